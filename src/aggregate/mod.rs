//! Aggregation engine: turns a (filtered) dataset into the data behind one
//! dashboard view.
//!
//! Every operation is a pure function of the dataset and its parameters.
//! Column references are checked before any row is scanned. An input with no
//! rows always yields `is_empty = true` and [`Payload::Empty`].

use serde::Serialize;

use crate::data::model::{Dataset, Schema, Value};
use crate::error::Result;

pub mod derived;
pub mod grouping;
pub mod ranking;
pub mod summary;

/// Added to a ratio's denominator unless a request says otherwise.
pub const DEFAULT_RATIO_EPSILON: f64 = 1.0;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Which view to compute, with the parameters that view needs.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationRequest {
    /// Row count per distinct value of one column. With a `universe`, every
    /// listed category is reported even at zero; with `top`, only the N most
    /// frequent categories are kept.
    CountByCategory {
        column: String,
        universe: Option<Vec<Value>>,
        top: Option<usize>,
    },
    /// Row count per distinct tuple of `columns`.
    GroupCount { columns: Vec<String> },
    /// First `n` rows after a stable sort on a numeric column.
    TopN {
        column: String,
        n: usize,
        order: SortOrder,
    },
    /// Per-rank share and running share of a numeric column's total.
    CumulativeConcentration {
        value_column: String,
        label_column: Option<String>,
        top: Option<usize>,
    },
    /// Append `numerator / (denominator + epsilon)` as a new column.
    CrossColumnRatio {
        numerator: String,
        denominator: String,
        epsilon: Option<f64>,
        output_column: String,
    },
    /// Mean of a numeric column per group, nulls excluded.
    GroupedMean {
        group_column: String,
        value_column: String,
    },
    Mean { column: String },
    /// Total of a numeric column, nulls excluded.
    Sum { column: String },
    DistinctCount { column: String },
    /// Pearson correlation between two numeric columns.
    Correlation { x: String, y: String },
    Histogram { column: String, bins: usize },
}

impl AggregationRequest {
    pub fn count_by_category(column: impl Into<String>) -> Self {
        AggregationRequest::CountByCategory {
            column: column.into(),
            universe: None,
            top: None,
        }
    }

    pub fn group_count<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AggregationRequest::GroupCount {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn top_n(column: impl Into<String>, n: usize, order: SortOrder) -> Self {
        AggregationRequest::TopN {
            column: column.into(),
            n,
            order,
        }
    }

    pub fn concentration(value_column: impl Into<String>) -> Self {
        AggregationRequest::CumulativeConcentration {
            value_column: value_column.into(),
            label_column: None,
            top: None,
        }
    }

    pub fn ratio(
        numerator: impl Into<String>,
        denominator: impl Into<String>,
        output_column: impl Into<String>,
    ) -> Self {
        AggregationRequest::CrossColumnRatio {
            numerator: numerator.into(),
            denominator: denominator.into(),
            epsilon: None,
            output_column: output_column.into(),
        }
    }

    pub fn grouped_mean(group_column: impl Into<String>, value_column: impl Into<String>) -> Self {
        AggregationRequest::GroupedMean {
            group_column: group_column.into(),
            value_column: value_column.into(),
        }
    }

    /// Check column references and parameters against `schema` without
    /// looking at any row.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        // Every kernel validates before it scans, so an empty table of the
        // same shape runs exactly those checks.
        let shape = Dataset::from_parts(String::new(), schema.clone(), Vec::new());
        dispatch(&shape, self).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A numeric outcome that may be undefined (mean of nothing, zero variance).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Measure {
    Defined(f64),
    Undefined,
}

impl Measure {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Measure::Defined(v) => Some(v),
            Measure::Undefined => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedCount {
    pub key: Vec<Value>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMean {
    pub key: Value,
    pub mean: Measure,
    /// Non-null values that went into the mean.
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationPoint {
    /// 1-based rank.
    pub rank: usize,
    pub label: Option<Value>,
    pub value: f64,
    pub share: f64,
    pub cumulative_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Empty,
    Scalar(Measure),
    Counts(Vec<KeyedCount>),
    Means(Vec<GroupMean>),
    Rows(Dataset),
    Concentration(Vec<ConcentrationPoint>),
    Histogram(Vec<HistogramBin>),
}

impl Payload {
    fn has_entries(&self) -> bool {
        match self {
            Payload::Empty => false,
            Payload::Scalar(_) => true,
            Payload::Counts(v) => !v.is_empty(),
            Payload::Means(v) => !v.is_empty(),
            Payload::Rows(ds) => !ds.is_empty(),
            Payload::Concentration(v) => !v.is_empty(),
            Payload::Histogram(v) => !v.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    pub payload: Payload,
    /// Rows that contributed to the payload.
    pub row_count_considered: usize,
    pub is_empty: bool,
}

impl AggregationResult {
    /// Wrap a payload; a payload with no entries collapses to [`Payload::Empty`].
    pub fn new(payload: Payload, row_count_considered: usize) -> Self {
        if payload.has_entries() {
            Self {
                payload,
                row_count_considered,
                is_empty: false,
            }
        } else {
            Self::empty(row_count_considered)
        }
    }

    pub fn empty(row_count_considered: usize) -> Self {
        Self {
            payload: Payload::Empty,
            row_count_considered,
            is_empty: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Compute the view described by `request`.
pub fn aggregate(dataset: &Dataset, request: &AggregationRequest) -> Result<AggregationResult> {
    let result = dispatch(dataset, request)?;
    log::debug!(
        "aggregated {} over {} rows (empty: {})",
        dataset.name(),
        result.row_count_considered,
        result.is_empty
    );
    Ok(result)
}

fn dispatch(dataset: &Dataset, request: &AggregationRequest) -> Result<AggregationResult> {
    use AggregationRequest::*;

    match request {
        CountByCategory {
            column,
            universe,
            top,
        } => grouping::count_by_category(dataset, column, universe.as_deref(), *top),
        GroupCount { columns } => grouping::group_count(dataset, columns),
        TopN { column, n, order } => ranking::top_n(dataset, column, *n, *order),
        CumulativeConcentration {
            value_column,
            label_column,
            top,
        } => ranking::cumulative_concentration(dataset, value_column, label_column.as_deref(), *top),
        CrossColumnRatio {
            numerator,
            denominator,
            epsilon,
            output_column,
        } => derived::cross_column_ratio(
            dataset,
            numerator,
            denominator,
            epsilon.unwrap_or(DEFAULT_RATIO_EPSILON),
            output_column,
        ),
        GroupedMean {
            group_column,
            value_column,
        } => grouping::grouped_mean(dataset, group_column, value_column),
        Mean { column } => summary::mean(dataset, column),
        Sum { column } => summary::sum(dataset, column),
        DistinctCount { column } => summary::distinct_count(dataset, column),
        Correlation { x, y } => summary::correlation(dataset, x, y),
        Histogram { column, bins } => summary::histogram(dataset, column, *bins),
    }
}

/// A usable number: numeric and not NaN.
pub(crate) fn number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| !v.is_nan())
}
