//! Counting and averaging per group.
//!
//! Groups are reported in first-seen order, so repeated calls on the same
//! input always produce the same sequence. Rows whose key contains a null are
//! left out of every group.

use std::collections::HashMap;

use super::{number, AggregationResult, GroupMean, KeyedCount, Measure, Payload};
use crate::data::model::{Dataset, Value};
use crate::error::{PipelineError, Result};

/// Insertion-ordered counter keyed by value tuples.
///
/// Numerically equal keys (`Integer(3)`, `Float(3.0)`) share one entry, which
/// keeps the first-seen spelling.
#[derive(Default)]
struct Tally {
    index: HashMap<Vec<Value>, usize>,
    counts: Vec<KeyedCount>,
}

impl Tally {
    fn bump(&mut self, key: Vec<Value>, by: u64) {
        let lookup: Vec<Value> = key.iter().map(normalized).collect();
        match self.index.get(&lookup) {
            Some(&i) => self.counts[i].count += by,
            None => {
                self.index.insert(lookup, self.counts.len());
                self.counts.push(KeyedCount { key, count: by });
            }
        }
    }
}

/// Integral floats inside the `i64` range compare as integers.
fn normalized(value: &Value) -> Value {
    match *value {
        Value::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Value::Integer(f as i64)
        }
        _ => value.clone(),
    }
}

/// Count rows per distinct value of `column`.
///
/// Categories in `universe` come first, in the given order, and are reported
/// even with zero rows; observed values outside the universe follow. With
/// `top`, categories are stably re-ordered by count (highest first) and cut to N.
pub fn count_by_category(
    dataset: &Dataset,
    column: &str,
    universe: Option<&[Value]>,
    top: Option<usize>,
) -> Result<AggregationResult> {
    let (idx, kind) = dataset.schema().require(column)?;
    let universe = universe.unwrap_or_default();
    if let Some(bad) = universe.iter().find(|v| !kind.admits_operand(v)) {
        return Err(PipelineError::configuration(format!(
            "{} category {bad} does not fit {kind} column '{column}'",
            bad.kind_name()
        )));
    }
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let mut tally = Tally::default();
    for category in universe {
        tally.bump(vec![category.clone()], 0);
    }

    let mut considered = 0;
    for row in dataset.rows() {
        if row[idx].is_null() {
            continue;
        }
        considered += 1;
        tally.bump(vec![row[idx].clone()], 1);
    }

    let mut counts = tally.counts;
    if let Some(n) = top {
        counts.sort_by(|a, b| b.count.cmp(&a.count));
        counts.truncate(n);
    }
    Ok(AggregationResult::new(Payload::Counts(counts), considered))
}

/// Count rows per distinct tuple of `columns`.
pub fn group_count(dataset: &Dataset, columns: &[String]) -> Result<AggregationResult> {
    if columns.is_empty() {
        return Err(PipelineError::configuration("group count needs at least one column"));
    }
    let indices = columns
        .iter()
        .map(|c| dataset.schema().require(c).map(|(i, _)| i))
        .collect::<Result<Vec<_>>>()?;
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let mut tally = Tally::default();
    let mut considered = 0;
    for row in dataset.rows() {
        if indices.iter().any(|&i| row[i].is_null()) {
            continue;
        }
        considered += 1;
        tally.bump(indices.iter().map(|&i| row[i].clone()).collect(), 1);
    }
    Ok(AggregationResult::new(Payload::Counts(tally.counts), considered))
}

/// Arithmetic mean of `value_column` per distinct value of `group_column`.
///
/// Null values are excluded from both sum and count; a group whose values are
/// all null reports [`Measure::Undefined`].
pub fn grouped_mean(
    dataset: &Dataset,
    group_column: &str,
    value_column: &str,
) -> Result<AggregationResult> {
    let (group_idx, _) = dataset.schema().require(group_column)?;
    let value_idx = dataset.schema().require_numeric(value_column)?;
    if dataset.is_empty() {
        return Ok(AggregationResult::empty(0));
    }

    let mut index: HashMap<&Value, usize> = HashMap::new();
    let mut sums: Vec<(Value, f64, usize)> = Vec::new();
    let mut considered = 0;

    for row in dataset.rows() {
        let key = &row[group_idx];
        if key.is_null() {
            continue;
        }
        considered += 1;
        let slot = *index.entry(key).or_insert_with(|| {
            sums.push((key.clone(), 0.0, 0));
            sums.len() - 1
        });
        if let Some(v) = number(&row[value_idx]) {
            sums[slot].1 += v;
            sums[slot].2 += 1;
        }
    }

    let means = sums
        .into_iter()
        .map(|(key, sum, count)| GroupMean {
            key,
            mean: if count == 0 {
                Measure::Undefined
            } else {
                Measure::Defined(sum / count as f64)
            },
            count,
        })
        .collect();
    Ok(AggregationResult::new(Payload::Means(means), considered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{ColumnType, Schema};

    fn salaries() -> Dataset {
        let schema = Schema::new([
            ("education", ColumnType::Categorical),
            ("gender", ColumnType::Categorical),
            ("salary", ColumnType::Numeric),
        ])
        .unwrap();
        Dataset::try_new(
            "salaries",
            schema,
            vec![
                vec!["PhD".into(), "F".into(), 100.0.into()],
                vec!["Bachelor".into(), "M".into(), 60.0.into()],
                vec!["PhD".into(), "M".into(), Value::Null],
                vec!["PhD".into(), "F".into(), 200.0.into()],
                vec!["Master".into(), Value::Null, Value::Null],
                vec![Value::Null, "M".into(), 80.0.into()],
            ],
        )
        .unwrap()
    }

    fn count_pairs(result: &AggregationResult) -> Vec<(Vec<Value>, u64)> {
        match &result.payload {
            Payload::Counts(c) => c.iter().map(|k| (k.key.clone(), k.count)).collect(),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn grouped_mean_excludes_nulls() {
        let result = grouped_mean(&salaries(), "education", "salary").unwrap();
        let Payload::Means(means) = result.payload else {
            panic!("expected means");
        };
        assert_eq!(means[0].key, Value::from("PhD"));
        assert_eq!(means[0].mean, Measure::Defined(150.0));
        assert_eq!(means[0].count, 2);
        assert_eq!(means[1].mean, Measure::Defined(60.0));
        assert_eq!(means[2].key, Value::from("Master"));
        assert_eq!(means[2].mean, Measure::Undefined);
        assert_eq!(result.row_count_considered, 5);
    }

    #[test]
    fn grouped_mean_requires_numeric_values() {
        let err = grouped_mean(&salaries(), "education", "gender").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn counts_follow_first_seen_order() {
        let result = count_by_category(&salaries(), "education", None, None).unwrap();
        assert_eq!(
            count_pairs(&result),
            vec![
                (vec!["PhD".into()], 3),
                (vec!["Bachelor".into()], 1),
                (vec!["Master".into()], 1),
            ]
        );
        assert_eq!(result.row_count_considered, 5);
    }

    #[test]
    fn universe_reports_zero_categories() {
        let universe = [Value::from("Master"), Value::from("HighSchool")];
        let result = count_by_category(&salaries(), "education", Some(&universe), None).unwrap();
        assert_eq!(
            count_pairs(&result),
            vec![
                (vec!["Master".into()], 1),
                (vec!["HighSchool".into()], 0),
                (vec!["PhD".into()], 3),
                (vec!["Bachelor".into()], 1),
            ]
        );
    }

    #[test]
    fn universe_matches_numeric_categories_by_value() {
        let schema = Schema::new([("cpu", ColumnType::Numeric)]).unwrap();
        let ds = Dataset::try_new("cpu", schema, vec![vec![3.0.into()], vec![5.0.into()], vec![3.0.into()]])
            .unwrap();
        let universe = [Value::Integer(3), Value::Integer(7)];
        let result = count_by_category(&ds, "cpu", Some(&universe), None).unwrap();
        assert_eq!(
            count_pairs(&result),
            vec![
                (vec![Value::Integer(3)], 2),
                (vec![Value::Integer(7)], 0),
                (vec![Value::Float(5.0)], 1),
            ]
        );
    }

    #[test]
    fn universe_of_wrong_type_is_rejected_up_front() {
        let err = count_by_category(&salaries(), "education", Some(&[Value::Integer(1)]), None)
            .unwrap_err();
        assert!(err.is_configuration());

        let err = count_by_category(&salaries(), "education", Some(&[Value::Null]), None).unwrap_err();
        assert!(err.is_configuration());

        let schema = Schema::new([("education", ColumnType::Categorical)]).unwrap();
        let empty = Dataset::try_new("empty", schema, Vec::new()).unwrap();
        let err = count_by_category(&empty, "education", Some(&[Value::Float(2.0)]), None).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn top_keeps_most_frequent_with_stable_ties() {
        let result = count_by_category(&salaries(), "gender", None, Some(1)).unwrap();
        assert_eq!(count_pairs(&result), vec![(vec!["M".into()], 3)]);

        let result = count_by_category(&salaries(), "education", None, Some(0)).unwrap();
        assert!(result.is_empty);
    }

    #[test]
    fn group_count_over_tuples() {
        let result = group_count(&salaries(), &["education".into(), "gender".into()]).unwrap();
        assert_eq!(
            count_pairs(&result),
            vec![
                (vec!["PhD".into(), "F".into()], 2),
                (vec!["Bachelor".into(), "M".into()], 1),
                (vec!["PhD".into(), "M".into()], 1),
            ]
        );
        assert!(group_count(&salaries(), &[]).unwrap_err().is_configuration());
    }

    #[test]
    fn group_count_is_deterministic() {
        let cols = ["gender".to_string()];
        let a = group_count(&salaries(), &cols).unwrap();
        let b = group_count(&salaries(), &cols).unwrap();
        assert_eq!(a, b);
    }
}
