//! Headline scalars and distribution bins.

use std::collections::HashSet;

use super::{number, AggregationResult, HistogramBin, Measure, Payload};
use crate::data::model::Dataset;
use crate::error::{PipelineError, Result};

/// Mean of the non-null values of a numeric column.
pub fn mean(dataset: &Dataset, column: &str) -> Result<AggregationResult> {
    let idx = dataset.schema().require_numeric(column)?;
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let (sum, count) = dataset
        .rows()
        .iter()
        .filter_map(|r| number(&r[idx]))
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    let measure = if count == 0 {
        Measure::Undefined
    } else {
        Measure::Defined(sum / count as f64)
    };
    Ok(AggregationResult::new(Payload::Scalar(measure), count))
}

/// Total of the non-null values of a numeric column; undefined when every
/// value is null.
pub fn sum(dataset: &Dataset, column: &str) -> Result<AggregationResult> {
    let idx = dataset.schema().require_numeric(column)?;
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let values: Vec<f64> = dataset.rows().iter().filter_map(|r| number(&r[idx])).collect();
    let measure = if values.is_empty() {
        Measure::Undefined
    } else {
        Measure::Defined(values.iter().sum())
    };
    Ok(AggregationResult::new(Payload::Scalar(measure), values.len()))
}

/// Number of distinct non-null values in a column.
pub fn distinct_count(dataset: &Dataset, column: &str) -> Result<AggregationResult> {
    let (idx, _) = dataset.schema().require(column)?;
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let present: Vec<_> = dataset
        .rows()
        .iter()
        .map(|r| &r[idx])
        .filter(|v| !v.is_null())
        .collect();
    let distinct: HashSet<_> = present.iter().collect();
    Ok(AggregationResult::new(
        Payload::Scalar(Measure::Defined(distinct.len() as f64)),
        present.len(),
    ))
}

/// Pearson correlation over rows where both columns are present.
///
/// Fewer than two pairs, or a column with zero variance, is undefined.
pub fn correlation(dataset: &Dataset, x: &str, y: &str) -> Result<AggregationResult> {
    let x_idx = dataset.schema().require_numeric(x)?;
    let y_idx = dataset.schema().require_numeric(y)?;
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let pairs: Vec<(f64, f64)> = dataset
        .rows()
        .iter()
        .filter_map(|r| number(&r[x_idx]).zip(number(&r[y_idx])))
        .collect();
    let n = pairs.len();
    if n < 2 {
        return Ok(AggregationResult::new(Payload::Scalar(Measure::Undefined), n));
    }

    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (px, py) in &pairs {
        let dx = px - mean_x;
        let dy = py - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let measure = if var_x == 0.0 || var_y == 0.0 {
        Measure::Undefined
    } else {
        Measure::Defined(cov / (var_x.sqrt() * var_y.sqrt()))
    };
    Ok(AggregationResult::new(Payload::Scalar(measure), n))
}

/// Equal-width bins over the finite values of a numeric column.
///
/// When every value is the same, a single bin holds them all.
pub fn histogram(dataset: &Dataset, column: &str, bins: usize) -> Result<AggregationResult> {
    let idx = dataset.schema().require_numeric(column)?;
    if bins == 0 {
        return Err(PipelineError::configuration("histogram needs at least one bin"));
    }
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let values: Vec<f64> = dataset
        .rows()
        .iter()
        .filter_map(|r| number(&r[idx]))
        .filter(|v| v.is_finite())
        .collect();
    let Some((min, max)) = values.iter().fold(None, |acc: Option<(f64, f64)>, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    }) else {
        return Ok(AggregationResult::empty(0));
    };

    if min == max {
        let bin = HistogramBin {
            lower: min,
            upper: max,
            count: values.len() as u64,
        };
        return Ok(AggregationResult::new(Payload::Histogram(vec![bin]), values.len()));
    }

    let width = (max - min) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();
    for v in &values {
        let slot = (((v - min) / width) as usize).min(bins - 1);
        out[slot].count += 1;
    }
    Ok(AggregationResult::new(Payload::Histogram(out), values.len()))
}
