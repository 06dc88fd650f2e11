//! Dataset acquisition, caching, filtering and aggregation for data dashboards.
//!
//! A dashboard session asks [`Pipeline`] for a dataset by [`DatasetId`]; the
//! [`CacheStore`] returns the cached copy or runs the [`Loader`] against an
//! [`ObjectSource`]. A [`FilterSet`] narrows the rows, and [`aggregate`] turns
//! the result into the data behind one view (KPI counts, ranked rows,
//! concentration curve, ...). Rendering is left to the caller.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;

pub use aggregate::{aggregate, AggregationRequest, AggregationResult, Measure, Payload, SortOrder};
pub use cache::CacheStore;
pub use config::PipelineConfig;
pub use data::filter::{apply, Filter, FilterOp, FilterSet};
pub use data::loader::{DatasetId, DecodeFormat, Loader};
pub use data::model::{ColumnType, Dataset, Schema, Value};
pub use data::source::{FsObjectSource, MemoryObjectSource, ObjectSource};
pub use error::{ConfigError, PipelineError, Result, SourceError};
pub use pipeline::Pipeline;
