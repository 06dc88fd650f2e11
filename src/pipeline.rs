use std::sync::Arc;

use crate::aggregate::{aggregate, AggregationRequest, AggregationResult};
use crate::cache::CacheStore;
use crate::config::PipelineConfig;
use crate::data::filter::{self, FilterSet};
use crate::data::loader::{DatasetId, Loader};
use crate::data::model::Dataset;
use crate::data::source::{FsObjectSource, ObjectSource};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Pipeline – the entry point a dashboard session talks to
// ---------------------------------------------------------------------------

/// Loader + cache + filter + aggregation wired together.
///
/// Shareable across threads; every call returns fresh values and never
/// mutates a cached dataset.
pub struct Pipeline {
    loader: Loader,
    cache: CacheStore,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(source: Arc<dyn ObjectSource>, config: PipelineConfig) -> Self {
        let loader = Loader::new(source).with_timestamp_formats(config.timestamp_formats.clone());
        Self {
            loader,
            cache: CacheStore::new(),
            config,
        }
    }

    /// Pipeline over a filesystem object store rooted at `config.object_root`.
    pub fn from_config(config: PipelineConfig) -> Self {
        let source = Arc::new(FsObjectSource::new(config.object_root.clone()));
        Self::new(source, config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Cached dataset, loading it on first access.
    pub fn dataset(&self, id: &DatasetId) -> Result<Arc<Dataset>> {
        self.cache.get_or_load(id, |id| self.loader.load(id))
    }

    /// Forget one dataset so the next access reloads it.
    pub fn refresh(&self, id: &DatasetId) -> bool {
        self.cache.invalidate(id)
    }

    /// Forget every cached dataset.
    pub fn refresh_all(&self) -> usize {
        self.cache.invalidate_all()
    }

    /// The dataset narrowed by `filters`, as an independent copy.
    pub fn filtered(&self, id: &DatasetId, filters: &FilterSet) -> Result<Dataset> {
        let dataset = self.dataset(id)?;
        filter::apply(&dataset, filters)
    }

    /// Load (or reuse), filter, then aggregate.
    ///
    /// The request is checked against the dataset's schema before any row is
    /// filtered. A ratio request without its own epsilon uses the configured one.
    pub fn query(
        &self,
        id: &DatasetId,
        filters: &FilterSet,
        request: &AggregationRequest,
    ) -> Result<AggregationResult> {
        let request = match request {
            AggregationRequest::CrossColumnRatio {
                numerator,
                denominator,
                epsilon: None,
                output_column,
            } => AggregationRequest::CrossColumnRatio {
                numerator: numerator.clone(),
                denominator: denominator.clone(),
                epsilon: Some(self.config.ratio_epsilon),
                output_column: output_column.clone(),
            },
            other => other.clone(),
        };

        let dataset = self.dataset(id)?;
        request.validate(dataset.schema())?;
        let filtered = filter::apply(&dataset, filters)?;
        aggregate(&filtered, &request)
    }
}
