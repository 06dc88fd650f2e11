use std::collections::BTreeSet;

use super::model::{ColumnType, Dataset, Value};
use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Filter predicates
// ---------------------------------------------------------------------------

/// Operator applied to one column.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Value must be a member of the set. An empty set means "no constraint".
    InSet(BTreeSet<Value>),
    /// Numeric value within `[min, max]`; nulls fail.
    Range { min: f64, max: f64 },
    /// Value must be present and not null.
    NotNull,
}

/// A single predicate over one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn in_set<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            column: column.into(),
            op: FilterOp::InSet(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn range(column: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Range { min, max },
        }
    }

    pub fn at_least(column: impl Into<String>, min: f64) -> Self {
        Self::range(column, min, f64::INFINITY)
    }

    pub fn at_most(column: impl Into<String>, max: f64) -> Self {
        Self::range(column, f64::NEG_INFINITY, max)
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::NotNull,
        }
    }

    /// Resolve against a schema, rejecting unknown columns and operators that
    /// do not fit the column type.
    fn bind<'a>(&'a self, dataset: &Dataset) -> Result<Bound<'a>> {
        let (idx, kind) = dataset.schema().require(&self.column)?;
        match &self.op {
            FilterOp::Range { min, max } => {
                if kind != ColumnType::Numeric {
                    return Err(PipelineError::configuration(format!(
                        "range filter on {kind} column '{}'",
                        self.column
                    )));
                }
                if min.is_nan() || max.is_nan() || min > max {
                    return Err(PipelineError::configuration(format!(
                        "invalid range [{min}, {max}] for column '{}'",
                        self.column
                    )));
                }
            }
            FilterOp::InSet(values) => {
                if let Some(bad) = values.iter().find(|v| !kind.admits_operand(v)) {
                    return Err(PipelineError::configuration(format!(
                        "{} operand {bad} does not fit {kind} column '{}'",
                        bad.kind_name(),
                        self.column
                    )));
                }
            }
            FilterOp::NotNull => {}
        }
        Ok(Bound {
            idx,
            numeric: kind == ColumnType::Numeric,
            op: &self.op,
        })
    }
}

/// A filter resolved to a column index.
struct Bound<'a> {
    idx: usize,
    numeric: bool,
    op: &'a FilterOp,
}

impl Bound<'_> {
    fn passes(&self, row: &[Value]) -> bool {
        let value = &row[self.idx];
        match self.op {
            FilterOp::InSet(selected) if selected.is_empty() => true,
            FilterOp::InSet(selected) if self.numeric => match value.as_f64() {
                Some(v) => selected.iter().any(|s| s.as_f64() == Some(v)),
                None => false,
            },
            FilterOp::InSet(selected) => selected.contains(value),
            FilterOp::Range { min, max } => match value.as_f64() {
                Some(v) => *min <= v && v <= *max,
                None => false,
            },
            FilterOp::NotNull => !value.is_null(),
        }
    }
}

// ---------------------------------------------------------------------------
// FilterSet – AND-combined predicates
// ---------------------------------------------------------------------------

/// Ordered collection of filters combined with logical AND.
/// An empty set keeps every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl FromIterator<Filter> for FilterSet {
    fn from_iter<T: IntoIterator<Item = Filter>>(iter: T) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Applying filters
// ---------------------------------------------------------------------------

/// Return indices of rows that pass every filter, in input order.
///
/// All filters are validated before any row is scanned.
pub fn filtered_indices(dataset: &Dataset, filters: &FilterSet) -> Result<Vec<usize>> {
    let bound = filters
        .filters
        .iter()
        .map(|f| f.bind(dataset))
        .collect::<Result<Vec<_>>>()?;

    Ok(dataset
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| bound.iter().all(|b| b.passes(row)))
        .map(|(i, _)| i)
        .collect())
}

/// Materialise the rows passing `filters` as a new dataset.
///
/// The result is always an independent copy, even for an empty filter set,
/// so downstream work never touches a cached original.
pub fn apply(dataset: &Dataset, filters: &FilterSet) -> Result<Dataset> {
    let indices = filtered_indices(dataset, filters)?;
    log::debug!(
        "filtered {}: {} of {} rows kept by {} filters",
        dataset.name(),
        indices.len(),
        dataset.len(),
        filters.len()
    );
    Ok(dataset.select_rows(&indices))
}
