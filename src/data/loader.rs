use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit, TimestampMillisecondType};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::model::{ColumnType, Dataset, Row, Schema, Value};
use super::source::ObjectSource;
use crate::error::{PipelineError, Result};

/// Formats tried, after RFC 3339, when normalising a timestamp column.
/// Date-only formats resolve to midnight.
pub const DEFAULT_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d",
    "%Y/%m/%d",
];

// ---------------------------------------------------------------------------
// Dataset identity
// ---------------------------------------------------------------------------

/// How the bytes of an object are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeFormat {
    /// Delimited text with a header row.
    Delimited { delimiter: u8 },
    /// Parquet (self-describing columnar binary).
    Parquet,
}

impl DecodeFormat {
    pub const CSV: DecodeFormat = DecodeFormat::Delimited { delimiter: b',' };

    /// Pick a format from the key's extension.
    pub fn from_key(key: &str) -> Option<Self> {
        let ext = key.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "parquet" | "pq" => Some(DecodeFormat::Parquet),
            "csv" => Some(DecodeFormat::CSV),
            "tsv" => Some(DecodeFormat::Delimited { delimiter: b'\t' }),
            _ => None,
        }
    }
}

/// Identity of a dataset: where it lives and how to decode it.
///
/// This is the cache key, so two requests that would decode differently never
/// share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetId {
    pub container: String,
    pub key: String,
    pub format: DecodeFormat,
    /// Column normalised into [`ColumnType::Timestamp`] after decoding.
    pub timestamp_column: Option<String>,
    /// Columns that must be present, with the type they are coerced to.
    pub declared: Vec<(String, ColumnType)>,
}

impl DatasetId {
    pub fn new(container: impl Into<String>, key: impl Into<String>, format: DecodeFormat) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            format,
            timestamp_column: None,
            declared: Vec::new(),
        }
    }

    pub fn csv(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(container, key, DecodeFormat::CSV)
    }

    pub fn parquet(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(container, key, DecodeFormat::Parquet)
    }

    /// Build an id whose format follows the key's extension.
    pub fn from_key(container: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let format = DecodeFormat::from_key(&key).ok_or_else(|| {
            PipelineError::configuration(format!("unsupported object extension in '{key}'"))
        })?;
        Ok(Self::new(container, key, format))
    }

    pub fn with_timestamp(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    pub fn with_column_type(mut self, column: impl Into<String>, kind: ColumnType) -> Self {
        self.declared.push((column.into(), kind));
        self
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Fetches objects from an [`ObjectSource`] and decodes them into [`Dataset`]s.
#[derive(Clone)]
pub struct Loader {
    source: Arc<dyn ObjectSource>,
    timestamp_formats: Vec<String>,
}

impl Loader {
    pub fn new(source: Arc<dyn ObjectSource>) -> Self {
        Self {
            source,
            timestamp_formats: DEFAULT_TIMESTAMP_FORMATS.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn with_timestamp_formats(mut self, formats: Vec<String>) -> Self {
        self.timestamp_formats = formats;
        self
    }

    /// Fetch and decode one dataset. A single attempt; no retries.
    pub fn load(&self, id: &DatasetId) -> Result<Dataset> {
        let started = Instant::now();
        let name = id.to_string();

        let bytes = self
            .source
            .fetch(&id.container, &id.key)
            .map_err(|cause| PipelineError::SourceUnavailable {
                dataset: name.clone(),
                cause,
            })?;
        log::debug!("fetched {name}: {} bytes", bytes.len());

        let raw = match id.format {
            DecodeFormat::Delimited { delimiter } => decode_delimited(&bytes, delimiter),
            DecodeFormat::Parquet => decode_parquet(Bytes::from(bytes)),
        }
        .map_err(|e| PipelineError::decode(&name, format!("{e:#}")))?;

        let dataset = self
            .normalise(id, raw)
            .map_err(|detail| PipelineError::decode(&name, detail))?;

        log::info!(
            "loaded {name}: {} rows, columns {:?} in {:?}",
            dataset.len(),
            dataset.schema().names().collect::<Vec<_>>(),
            started.elapsed()
        );
        Ok(dataset)
    }

    /// Apply declared column types and timestamp normalisation.
    fn normalise(&self, id: &DatasetId, mut raw: RawTable) -> Result<Dataset, String> {
        for (column, kind) in &id.declared {
            let idx = raw
                .index_of(column)
                .ok_or_else(|| format!("expected column '{column}' is missing"))?;
            raw.coerce(idx, *kind, &self.timestamp_formats)?;
        }

        if let Some(column) = &id.timestamp_column {
            let idx = raw
                .index_of(column)
                .ok_or_else(|| format!("timestamp column '{column}' is missing"))?;
            raw.coerce(idx, ColumnType::Timestamp, &self.timestamp_formats)?;
        }

        let schema = Schema::new(raw.columns).map_err(|e| e.to_string())?;
        Ok(Dataset::from_parts(id.to_string(), schema, raw.rows))
    }
}

// ---------------------------------------------------------------------------
// Decoded table before normalisation
// ---------------------------------------------------------------------------

struct RawTable {
    columns: Vec<(String, ColumnType)>,
    rows: Vec<Row>,
}

impl RawTable {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == name)
    }

    /// Convert every cell of column `idx` to `kind`.
    fn coerce(&mut self, idx: usize, kind: ColumnType, formats: &[String]) -> Result<(), String> {
        let name = self.columns[idx].0.clone();
        for (row_no, row) in self.rows.iter_mut().enumerate() {
            let cell = std::mem::replace(&mut row[idx], Value::Null);
            row[idx] = coerce_value(cell, kind, formats)
                .map_err(|e| format!("row {row_no}, column '{name}': {e}"))?;
        }
        // Numeric columns hold either all integers or all floats.
        if kind == ColumnType::Numeric
            && self.rows.iter().any(|r| matches!(r[idx], Value::Float(_)))
        {
            for row in &mut self.rows {
                if let Value::Integer(i) = row[idx] {
                    row[idx] = Value::Float(i as f64);
                }
            }
        }
        self.columns[idx].1 = kind;
        Ok(())
    }
}

fn coerce_value(value: Value, kind: ColumnType, formats: &[String]) -> Result<Value, String> {
    if kind.accepts(&value) {
        return Ok(value);
    }
    match (kind, value) {
        (ColumnType::Numeric, Value::Text(s)) => parse_number(&s)
            .ok_or_else(|| format!("'{s}' is not a number")),
        (ColumnType::Timestamp, Value::Text(s)) => parse_timestamp(&s, formats)
            .map(Value::Timestamp)
            .ok_or_else(|| format!("'{s}' is not a recognised timestamp")),
        (ColumnType::Categorical | ColumnType::Text, v @ (Value::Bool(_) | Value::Integer(_) | Value::Float(_) | Value::Timestamp(_))) => {
            Ok(Value::Text(v.to_string()))
        }
        (kind, v) => Err(format!("cannot convert {} value to {kind}", v.kind_name())),
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    s.parse::<f64>().ok().map(Value::Float)
}

/// Parse a timestamp as RFC 3339 or one of `formats`.
pub fn parse_timestamp(s: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    formats.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt).ok().or_else(|| {
            NaiveDate::parse_from_str(s, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    })
}

// ---------------------------------------------------------------------------
// Delimited text decoder
// ---------------------------------------------------------------------------

/// What a delimited column turned out to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inferred {
    Integer,
    Float,
    Bool,
    Text,
}

impl Inferred {
    fn of<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> Self {
        let mut present = cells.map(str::trim).filter(|c| !c.is_empty()).peekable();
        if present.peek().is_none() {
            return Inferred::Text;
        }
        if present.clone().all(|c| c.parse::<i64>().is_ok()) {
            Inferred::Integer
        } else if present.clone().all(|c| c.parse::<f64>().is_ok()) {
            Inferred::Float
        } else if present.all(|c| c == "true" || c == "false") {
            Inferred::Bool
        } else {
            Inferred::Text
        }
    }

    fn column_type(self) -> ColumnType {
        match self {
            Inferred::Integer | Inferred::Float => ColumnType::Numeric,
            Inferred::Bool | Inferred::Text => ColumnType::Categorical,
        }
    }

    fn parse(self, cell: &str) -> Value {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        // Inference already proved every non-empty cell parses.
        match self {
            Inferred::Integer => trimmed.parse().map_or(Value::Null, Value::Integer),
            Inferred::Float => trimmed.parse().map_or(Value::Null, Value::Float),
            Inferred::Bool => Value::Bool(trimmed == "true"),
            Inferred::Text => Value::Text(cell.to_string()),
        }
    }
}

/// Header row gives column names; column types are inferred from the cells.
fn decode_delimited(bytes: &[u8], delimiter: u8) -> anyhow::Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()
        .context("reading header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        bail!("missing header row");
    }

    let mut records = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        records.push(result.with_context(|| format!("row {row_no}"))?);
    }

    let inferred: Vec<Inferred> = (0..headers.len())
        .map(|i| Inferred::of(records.iter().map(|r| r.get(i).unwrap_or(""))))
        .collect();

    let rows = records
        .iter()
        .map(|record| {
            inferred
                .iter()
                .enumerate()
                .map(|(i, kind)| kind.parse(record.get(i).unwrap_or("")))
                .collect()
        })
        .collect();

    let columns = headers
        .into_iter()
        .zip(inferred.iter().map(|k| k.column_type()))
        .collect();
    Ok(RawTable { columns, rows })
}

// ---------------------------------------------------------------------------
// Parquet decoder
// ---------------------------------------------------------------------------

fn column_type_for(data_type: &DataType) -> anyhow::Result<ColumnType> {
    Ok(match data_type {
        dt if dt.is_integer() || dt.is_floating() => ColumnType::Numeric,
        DataType::Decimal128(..) | DataType::Decimal256(..) => ColumnType::Numeric,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Boolean => {
            ColumnType::Categorical
        }
        DataType::Dictionary(_, value)
            if matches!(value.as_ref(), DataType::Utf8 | DataType::LargeUtf8) =>
        {
            ColumnType::Categorical
        }
        DataType::Timestamp(..) | DataType::Date32 | DataType::Date64 => ColumnType::Timestamp,
        other => bail!("unsupported column type {other:?}"),
    })
}

/// Convert one Arrow column into cell values.
fn column_values(col: &ArrayRef) -> anyhow::Result<Vec<Value>> {
    let dt = col.data_type();
    if dt.is_integer() {
        let arr = cast(col, &DataType::Int64)?;
        return Ok(arr.as_primitive::<Int64Type>().iter().map(Value::from).collect());
    }
    if dt.is_floating() || matches!(dt, DataType::Decimal128(..) | DataType::Decimal256(..)) {
        let arr = cast(col, &DataType::Float64)?;
        return Ok(arr.as_primitive::<Float64Type>().iter().map(Value::from).collect());
    }
    match dt {
        DataType::Boolean => Ok(col.as_boolean().iter().map(Value::from).collect()),
        DataType::Timestamp(..) | DataType::Date32 | DataType::Date64 => {
            let arr = cast(col, &DataType::Timestamp(TimeUnit::Millisecond, None))?;
            arr.as_primitive::<TimestampMillisecondType>()
                .iter()
                .map(|ms| match ms {
                    None => Ok(Value::Null),
                    Some(ms) => DateTime::from_timestamp_millis(ms)
                        .map(|t| Value::Timestamp(t.naive_utc()))
                        .ok_or_else(|| anyhow!("timestamp {ms}ms out of range")),
                })
                .collect()
        }
        _ => {
            let arr = cast(col, &DataType::Utf8)?;
            Ok(arr
                .as_string::<i32>()
                .iter()
                .map(|s| Value::from(s.map(str::to_string)))
                .collect())
        }
    }
}

fn decode_parquet(bytes: Bytes) -> anyhow::Result<RawTable> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(bytes).context("reading parquet metadata")?;

    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|f| {
            column_type_for(f.data_type())
                .map(|kind| (f.name().clone(), kind))
                .with_context(|| format!("column '{}'", f.name()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let mut converted = Vec::with_capacity(columns.len());
        for (col, (name, _)) in batch.columns().iter().zip(&columns) {
            let values = column_values(col).with_context(|| format!("column '{name}'"))?;
            converted.push(values.into_iter());
        }
        for _ in 0..batch.num_rows() {
            rows.push(
                converted
                    .iter_mut()
                    .map(|c| c.next().unwrap_or(Value::Null))
                    .collect(),
            );
        }
    }

    Ok(RawTable { columns, rows })
}
