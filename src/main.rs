use anyhow::{bail, Context, Result};

use dash_pipeline::data::loader::parse_timestamp;
use dash_pipeline::{
    AggregationRequest, ColumnType, Dataset, DatasetId, Filter, FilterSet, Pipeline,
    PipelineConfig, SortOrder, Value,
};

const USAGE: &str = "\
usage: dash-pipeline <container> <key> <view> [--timestamp COL] [--where COL=V1|V2 | COL=MIN..MAX]...

views:
  counts:COL            rows per category
  group:COL,COL         rows per group tuple
  top:COL:N             top N rows by COL (descending)
  bottom:COL:N          top N rows by COL (ascending)
  concentration:COL[:LABEL]
  ratio:NUM:DEN:OUT     NUM / (DEN + epsilon)
  grouped-mean:GROUP:VALUE
  mean:COL | sum:COL | distinct:COL | corr:X:Y | histogram:COL:BINS";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("{USAGE}");
    }

    let config = PipelineConfig::from_env().context("reading configuration")?;
    let pipeline = Pipeline::from_config(config);

    let mut id = DatasetId::from_key(&args[0], &args[1])?;
    let mut conditions = Vec::new();
    let mut rest = args[3..].iter();
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .with_context(|| format!("missing value after {flag}"))?;
        match flag.as_str() {
            "--timestamp" => id = id.with_timestamp(value),
            "--where" => conditions.push(value.clone()),
            other => bail!("unknown flag {other}\n{USAGE}"),
        }
    }

    let dataset = pipeline
        .dataset(&id)
        .with_context(|| format!("loading {id}"))?;
    log::info!("{id}: {} rows", dataset.len());

    let filters = conditions
        .iter()
        .map(|c| parse_filter(&dataset, c, &pipeline.config().timestamp_formats))
        .collect::<Result<FilterSet>>()?;
    let request = parse_view(&args[2])?;

    let result = pipeline.query(&id, &filters, &request)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// `COL=MIN..MAX` on numeric columns, `COL=A|B|C` otherwise. Timestamp
/// operands go through the configured timestamp formats; columns holding
/// booleans take `true`/`false`.
fn parse_filter(dataset: &Dataset, condition: &str, timestamp_formats: &[String]) -> Result<Filter> {
    let (column, operand) = condition
        .split_once('=')
        .with_context(|| format!("filter '{condition}' is not COL=VALUE"))?;
    let kind = dataset
        .schema()
        .column(column)
        .map(|c| c.kind)
        .with_context(|| format!("unknown column '{column}'"))?;

    if kind == ColumnType::Numeric {
        if let Some((min, max)) = operand.split_once("..") {
            return Ok(Filter::range(column, min.parse()?, max.parse()?));
        }
        let values = operand
            .split('|')
            .map(|v| v.parse::<f64>().map(Value::Float))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Filter::in_set(column, values));
    }
    if kind == ColumnType::Timestamp {
        let values = operand
            .split('|')
            .map(|v| {
                parse_timestamp(v, timestamp_formats)
                    .map(Value::from)
                    .with_context(|| format!("'{v}' is not a timestamp"))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Filter::in_set(column, values));
    }
    let holds_bools = dataset
        .column_values(column)?
        .iter()
        .any(|v| matches!(v, Value::Bool(_)));
    if holds_bools {
        let values = operand
            .split('|')
            .map(|v| {
                v.trim()
                    .parse::<bool>()
                    .map(Value::Bool)
                    .with_context(|| format!("'{v}' is not true or false"))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Filter::in_set(column, values));
    }
    Ok(Filter::in_set(column, operand.split('|')))
}

fn parse_view(view: &str) -> Result<AggregationRequest> {
    let parts: Vec<&str> = view.split(':').collect();
    let request = match parts.as_slice() {
        ["counts", col] => AggregationRequest::count_by_category(*col),
        ["group", cols] => AggregationRequest::group_count(cols.split(',')),
        ["top", col, n] => AggregationRequest::top_n(*col, n.parse()?, SortOrder::Descending),
        ["bottom", col, n] => AggregationRequest::top_n(*col, n.parse()?, SortOrder::Ascending),
        ["concentration", col] => AggregationRequest::concentration(*col),
        ["concentration", col, label] => AggregationRequest::CumulativeConcentration {
            value_column: col.to_string(),
            label_column: Some(label.to_string()),
            top: None,
        },
        ["ratio", num, den, out] => AggregationRequest::ratio(*num, *den, *out),
        ["grouped-mean", group, value] => AggregationRequest::grouped_mean(*group, *value),
        ["mean", col] => AggregationRequest::Mean { column: col.to_string() },
        ["sum", col] => AggregationRequest::Sum { column: col.to_string() },
        ["distinct", col] => AggregationRequest::DistinctCount { column: col.to_string() },
        ["corr", x, y] => AggregationRequest::Correlation {
            x: x.to_string(),
            y: y.to_string(),
        },
        ["histogram", col, bins] => AggregationRequest::Histogram {
            column: col.to_string(),
            bins: bins.parse()?,
        },
        _ => bail!("unknown view '{view}'\n{USAGE}"),
    };
    Ok(request)
}
