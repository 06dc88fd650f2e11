use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Value – a single cell
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value.
/// Values key `BTreeSet` / `HashMap` downstream, so `Value` must be `Ord` and `Hash`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

// -- Manual Eq/Ord/Hash so that equality, ordering and hashing agree (floats included) --

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        fn discriminant(v: &Value) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                Text(_) => 4,
                Timestamp(_) => 5,
            }
        }
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => discriminant(self).cmp(&discriminant(other)),
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Text(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Null => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            Value::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(t: NaiveDateTime) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl Value {
    /// Interpret the value as an `f64` when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Semantic type of a column, fixed once a dataset is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Timestamp,
    Text,
}

impl ColumnType {
    /// Whether a cell value may live in a column of this type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Numeric, Value::Integer(_) | Value::Float(_)) => true,
            (ColumnType::Categorical, Value::Text(_) | Value::Bool(_)) => true,
            (ColumnType::Timestamp, Value::Timestamp(_)) => true,
            (ColumnType::Text, Value::Text(_)) => true,
            _ => false,
        }
    }

    /// Whether `value` can be compared against cells of this type: any number
    /// for numeric columns, otherwise a non-null value the column accepts.
    pub fn admits_operand(self, value: &Value) -> bool {
        match self {
            ColumnType::Numeric => value.as_f64().is_some(),
            _ => self.accepts(value) && !value.is_null(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Categorical => "categorical",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

/// Ordered column name → type mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let mut schema = Schema::default();
        for (name, kind) in columns {
            schema.push(name, kind)?;
        }
        Ok(schema)
    }

    /// Append a column; names must be unique.
    pub fn push(&mut self, name: impl Into<String>, kind: ColumnType) -> Result<()> {
        let name = name.into();
        if self.index_of(&name).is_some() {
            return Err(PipelineError::configuration(format!(
                "duplicate column '{name}' in schema"
            )));
        }
        self.columns.push(Column { name, kind });
        Ok(())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look a column up, reporting a configuration error when it is absent.
    pub fn require(&self, name: &str) -> Result<(usize, ColumnType)> {
        self.index_of(name)
            .map(|i| (i, self.columns[i].kind))
            .ok_or_else(|| PipelineError::configuration(format!("unknown column '{name}'")))
    }

    /// Like [`Schema::require`] but the column must be numeric.
    pub fn require_numeric(&self, name: &str) -> Result<usize> {
        match self.require(name)? {
            (i, ColumnType::Numeric) => Ok(i),
            (_, kind) => Err(PipelineError::configuration(format!(
                "column '{name}' is {kind}, expected numeric"
            ))),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Dataset – the complete loaded table
// ---------------------------------------------------------------------------

/// One row; values are positionally aligned with the dataset schema.
pub type Row = Vec<Value>;

/// An in-memory table with a fixed schema and an ordered row sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    name: String,
    schema: Schema,
    rows: Vec<Row>,
}

impl Dataset {
    /// Build a dataset, checking that every row matches the schema.
    pub fn try_new(name: impl Into<String>, schema: Schema, rows: Vec<Row>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != schema.len() {
                return Err(PipelineError::configuration(format!(
                    "row {i} has {} values, schema has {} columns",
                    row.len(),
                    schema.len()
                )));
            }
            for (value, column) in row.iter().zip(schema.columns()) {
                if !column.kind.accepts(value) {
                    return Err(PipelineError::configuration(format!(
                        "row {i}: {} value in {} column '{}'",
                        value.kind_name(),
                        column.kind,
                        column.name
                    )));
                }
            }
        }
        Ok(Self::from_parts(name.into(), schema, rows))
    }

    /// Assemble without validation; callers guarantee rows already fit `schema`.
    pub(crate) fn from_parts(name: String, schema: Schema, rows: Vec<Row>) -> Self {
        Dataset { name, schema, rows }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` in the named column.
    pub fn value(&self, row: usize, column: &str) -> Result<&Value> {
        let (idx, _) = self.schema.require(column)?;
        self.rows
            .get(row)
            .map(|r| &r[idx])
            .ok_or_else(|| PipelineError::configuration(format!("row {row} out of bounds")))
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, column: &str) -> Result<Vec<&Value>> {
        let (idx, _) = self.schema.require(column)?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Sorted set of distinct non-null values of a column (multi-select options).
    pub fn unique_values(&self, column: &str) -> Result<BTreeSet<Value>> {
        let (idx, _) = self.schema.require(column)?;
        Ok(self
            .rows
            .iter()
            .map(|r| &r[idx])
            .filter(|v| !v.is_null())
            .cloned()
            .collect())
    }

    /// `(min, max)` over the non-null values of a numeric column, `None` when there are none.
    pub fn numeric_range(&self, column: &str) -> Result<Option<(f64, f64)>> {
        let idx = self.schema.require_numeric(column)?;
        Ok(self
            .rows
            .iter()
            .filter_map(|r| r[idx].as_f64())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            }))
    }

    /// Copy of this dataset holding only the rows at `indices`, in the given order.
    /// Every index must be in bounds.
    pub(crate) fn select_rows(&self, indices: &[usize]) -> Dataset {
        let rows = indices.iter().map(|&i| self.rows[i].clone()).collect();
        Dataset::from_parts(self.name.clone(), self.schema.clone(), rows)
    }

    /// Copy of this dataset with one extra column appended.
    pub(crate) fn with_column(&self, name: &str, kind: ColumnType, values: Vec<Value>) -> Result<Dataset> {
        let mut schema = self.schema.clone();
        schema.push(name, kind)?;
        let rows = self
            .rows
            .iter()
            .zip(values)
            .map(|(row, v)| {
                let mut row = row.clone();
                row.push(v);
                row
            })
            .collect();
        Ok(Dataset::from_parts(self.name.clone(), schema, rows))
    }
}
