use std::cmp::Ordering;

use super::{number, AggregationResult, ConcentrationPoint, Payload, SortOrder};
use crate::data::model::Dataset;
use crate::error::Result;

/// Row indices stably sorted on numeric column `idx`; nulls always sort last.
fn ranked_indices(dataset: &Dataset, idx: usize, order: SortOrder) -> Vec<usize> {
    let rows = dataset.rows();
    let mut ranked: Vec<usize> = (0..rows.len()).collect();
    ranked.sort_by(|&a, &b| match (number(&rows[a][idx]), number(&rows[b][idx])) {
        (Some(x), Some(y)) => match order {
            SortOrder::Ascending => x.total_cmp(&y),
            SortOrder::Descending => y.total_cmp(&x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    ranked
}

/// The first `n` rows ordered by `column`.
///
/// Rows with equal keys keep their original relative order. Asking for more
/// rows than exist returns all of them.
pub fn top_n(dataset: &Dataset, column: &str, n: usize, order: SortOrder) -> Result<AggregationResult> {
    let idx = dataset.schema().require_numeric(column)?;
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let mut ranked = ranked_indices(dataset, idx, order);
    ranked.truncate(n);
    Ok(AggregationResult::new(
        Payload::Rows(dataset.select_rows(&ranked)),
        dataset.len(),
    ))
}

/// Rank rows by `value_column` (descending) and report each rank's share of
/// the total along with the running share, both in percent.
///
/// Null values are skipped. `top` keeps only the first N ranks, and the total
/// is taken over those ranks. A zero total makes every share zero.
pub fn cumulative_concentration(
    dataset: &Dataset,
    value_column: &str,
    label_column: Option<&str>,
    top: Option<usize>,
) -> Result<AggregationResult> {
    let idx = dataset.schema().require_numeric(value_column)?;
    let label_idx = label_column
        .map(|c| dataset.schema().require(c).map(|(i, _)| i))
        .transpose()?;
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let rows = dataset.rows();
    let mut ranked: Vec<(usize, f64)> = ranked_indices(dataset, idx, SortOrder::Descending)
        .into_iter()
        .filter_map(|i| number(&rows[i][idx]).map(|v| (i, v)))
        .collect();
    if let Some(n) = top {
        ranked.truncate(n);
    }

    let total: f64 = ranked.iter().map(|(_, v)| v).sum();
    let mut cumulative = 0.0;
    let points: Vec<ConcentrationPoint> = ranked
        .iter()
        .enumerate()
        .map(|(rank, &(i, value))| {
            let share = if total == 0.0 { 0.0 } else { value / total * 100.0 };
            cumulative += share;
            ConcentrationPoint {
                rank: rank + 1,
                label: label_idx.map(|l| rows[i][l].clone()),
                value,
                share,
                cumulative_share: cumulative,
            }
        })
        .collect();

    let considered = points.len();
    Ok(AggregationResult::new(Payload::Concentration(points), considered))
}
