use super::{number, AggregationResult, Payload};
use crate::data::model::{ColumnType, Dataset, Value};
use crate::error::{PipelineError, Result};

/// `numerator / (denominator + epsilon)`.
///
/// With a zero denominator this is `numerator / epsilon`: finite and bounded,
/// but an approximation rather than a true ratio. Returns `None` when the
/// guarded denominator is still exactly zero (e.g. a denominator of `-epsilon`).
pub fn guarded_ratio(numerator: f64, denominator: f64, epsilon: f64) -> Option<f64> {
    let denominator = denominator + epsilon;
    (denominator != 0.0).then(|| numerator / denominator)
}

/// Copy of `dataset` with `output_column` holding the epsilon-guarded ratio of
/// two numeric columns. A null operand yields a null ratio.
pub fn cross_column_ratio(
    dataset: &Dataset,
    numerator: &str,
    denominator: &str,
    epsilon: f64,
    output_column: &str,
) -> Result<AggregationResult> {
    let num_idx = dataset.schema().require_numeric(numerator)?;
    let den_idx = dataset.schema().require_numeric(denominator)?;
    if dataset.schema().index_of(output_column).is_some() {
        return Err(PipelineError::configuration(format!(
            "ratio output column '{output_column}' already exists"
        )));
    }
    if !epsilon.is_finite() {
        return Err(PipelineError::configuration(format!(
            "ratio epsilon must be finite, got {epsilon}"
        )));
    }
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let ratios = dataset
        .rows()
        .iter()
        .map(|row| {
            let n = number(&row[num_idx]);
            let d = number(&row[den_idx]);
            Value::from(n.zip(d).and_then(|(n, d)| guarded_ratio(n, d, epsilon)))
        })
        .collect();

    let derived = dataset.with_column(output_column, ColumnType::Numeric, ratios)?;
    Ok(AggregationResult::new(Payload::Rows(derived), dataset.len()))
}
