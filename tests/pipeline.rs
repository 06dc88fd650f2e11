use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use dash_pipeline::aggregate::{GroupMean, KeyedCount};
use dash_pipeline::data::filter::filtered_indices;
use dash_pipeline::{
    aggregate, apply, AggregationRequest, CacheStore, ColumnType, DatasetId, Filter, FilterSet,
    Loader, Measure, MemoryObjectSource, ObjectSource, Payload, Pipeline, PipelineConfig,
    SortOrder, SourceError, Value,
};

const SERVERS_CSV: &str = "\
timestamp,server_id,cpu_usage,status
2024-05-01T10:00:00Z,a,40.0,OK
2024-05-01T10:05:00Z,a,97.5,ERROR
2024-05-01T10:10:00Z,b,22.0,OK
";

const SALARY_CSV: &str = "\
Age,Gender,Education Level,Salary
32,Male,PhD,100
41,Female,PhD,
29,Female,PhD,200
25,Male,Bachelor,60000
";

fn artists_parquet() -> Vec<u8> {
    let schema = Arc::new(ArrowSchema::new(vec![
        Field::new("artist_name", DataType::Utf8, false),
        Field::new("lastfm_playcount", DataType::Int64, true),
        Field::new("lastfm_listeners", DataType::Int64, true),
        Field::new("spotify_followers", DataType::Float64, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(vec!["Low", "Top", "Mid", "Unknown"])),
            Arc::new(Int64Array::from(vec![Some(100), Some(600), Some(300), None])),
            Arc::new(Int64Array::from(vec![Some(50), Some(400), Some(90), Some(7)])),
            Arc::new(Float64Array::from(vec![Some(0.0), Some(999.0), Some(29.0), None])),
        ],
    )
    .unwrap();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    buf
}

fn source() -> Arc<MemoryObjectSource> {
    let src = Arc::new(MemoryObjectSource::new());
    src.put("bucket", "processed/data_procesada.csv", SERVERS_CSV);
    src.put("bucket", "Salary_Data_clean.csv", SALARY_CSV);
    src.put("bucket", "clean/artists_combined.parquet", artists_parquet());
    src
}

/// Counts every fetch that reaches the underlying source.
struct CountingSource {
    inner: Arc<MemoryObjectSource>,
    fetches: AtomicUsize,
}

impl ObjectSource for CountingSource {
    fn fetch(&self, container: &str, key: &str) -> Result<Vec<u8>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(container, key)
    }
}

fn counts(payload: &Payload) -> Vec<(Vec<Value>, u64)> {
    match payload {
        Payload::Counts(c) => c.iter().map(|KeyedCount { key, count }| (key.clone(), *count)).collect(),
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn monitoring_dashboard_flow() {
    let pipeline = Pipeline::new(source(), PipelineConfig::default());
    let id = DatasetId::csv("bucket", "processed/data_procesada.csv").with_timestamp("timestamp");

    let dataset = pipeline.dataset(&id).unwrap();
    assert_eq!(dataset.schema().column("timestamp").unwrap().kind, ColumnType::Timestamp);

    let kpis = pipeline
        .query(&id, &FilterSet::new(), &AggregationRequest::count_by_category("status"))
        .unwrap();
    assert_eq!(
        counts(&kpis.payload),
        vec![(vec![Value::from("OK")], 2), (vec![Value::from("ERROR")], 1)]
    );

    let errors_only = FilterSet::new().with(Filter::in_set("status", ["ERROR"]));
    let per_server = pipeline
        .query(&id, &errors_only, &AggregationRequest::count_by_category("server_id"))
        .unwrap();
    assert_eq!(counts(&per_server.payload), vec![(vec![Value::from("a")], 1)]);

    let by_server_status = pipeline
        .query(&id, &FilterSet::new(), &AggregationRequest::group_count(["server_id", "status"]))
        .unwrap();
    assert_eq!(counts(&by_server_status.payload).len(), 3);

    let nothing = FilterSet::new().with(Filter::in_set("server_id", ["zzz"]));
    let empty = pipeline
        .query(&id, &nothing, &AggregationRequest::grouped_mean("server_id", "cpu_usage"))
        .unwrap();
    assert!(empty.is_empty);
    assert_eq!(empty.payload, Payload::Empty);
}

#[test]
fn salary_dashboard_means_ignore_missing_salaries() {
    let pipeline = Pipeline::new(source(), PipelineConfig::default());
    let id = DatasetId::csv("bucket", "Salary_Data_clean.csv");

    let result = pipeline
        .query(&id, &FilterSet::new(), &AggregationRequest::grouped_mean("Education Level", "Salary"))
        .unwrap();
    let Payload::Means(means) = result.payload else {
        panic!("expected means");
    };
    assert_eq!(
        means[0],
        GroupMean {
            key: Value::from("PhD"),
            mean: Measure::Defined(150.0),
            count: 2,
        }
    );

    let range = FilterSet::new()
        .with(Filter::in_set("Gender", ["Female"]))
        .with(Filter::range("Salary", 0.0, 1000.0));
    let avg = pipeline
        .query(&id, &range, &AggregationRequest::Mean { column: "Salary".into() })
        .unwrap();
    assert_eq!(avg.payload, Payload::Scalar(Measure::Defined(200.0)));
    assert_eq!(avg.row_count_considered, 1);

    let bad = FilterSet::new().with(Filter::range("Gender", 0.0, 1.0));
    let err = pipeline
        .query(&id, &bad, &AggregationRequest::Mean { column: "Salary".into() })
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn music_dashboard_ranking_concentration_and_engagement() {
    let pipeline = Pipeline::new(source(), PipelineConfig::default());
    let id = DatasetId::from_key("bucket", "clean/artists_combined.parquet").unwrap();

    let top = pipeline
        .query(&id, &FilterSet::new(), &AggregationRequest::top_n("lastfm_playcount", 2, SortOrder::Descending))
        .unwrap();
    let Payload::Rows(rows) = &top.payload else {
        panic!("expected rows");
    };
    assert_eq!(rows.value(0, "artist_name").unwrap(), &Value::from("Top"));
    assert_eq!(rows.value(1, "artist_name").unwrap(), &Value::from("Mid"));

    let concentration = pipeline
        .query(
            &id,
            &FilterSet::new(),
            &AggregationRequest::CumulativeConcentration {
                value_column: "lastfm_playcount".into(),
                label_column: Some("artist_name".into()),
                top: Some(50),
            },
        )
        .unwrap();
    let Payload::Concentration(points) = &concentration.payload else {
        panic!("expected concentration");
    };
    assert_eq!(points.len(), 3);
    assert!((points[0].share - 60.0).abs() < 1e-9);
    assert!((points.last().unwrap().cumulative_share - 100.0).abs() < 1e-9);

    let total_plays = pipeline
        .query(&id, &FilterSet::new(), &AggregationRequest::Sum { column: "lastfm_playcount".into() })
        .unwrap();
    assert_eq!(total_plays.payload, Payload::Scalar(Measure::Defined(1000.0)));
    assert_eq!(total_plays.row_count_considered, 3);

    let complete = FilterSet::new()
        .with(Filter::not_null("lastfm_listeners"))
        .with(Filter::not_null("spotify_followers"));
    let engagement = pipeline
        .query(
            &id,
            &complete,
            &AggregationRequest::ratio("lastfm_listeners", "spotify_followers", "engagement_ratio"),
        )
        .unwrap();
    let Payload::Rows(rows) = &engagement.payload else {
        panic!("expected rows");
    };
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.value(0, "engagement_ratio").unwrap(), &Value::Float(50.0));
    assert_eq!(rows.value(1, "engagement_ratio").unwrap(), &Value::Float(0.4));
}

#[test]
fn cache_loads_once_until_invalidated() {
    let counting = Arc::new(CountingSource {
        inner: source(),
        fetches: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::new(counting.clone(), PipelineConfig::default());
    let id = DatasetId::csv("bucket", "Salary_Data_clean.csv");

    let first = pipeline.dataset(&id).unwrap();
    let second = pipeline.dataset(&id).unwrap();
    assert_eq!(first, second);
    assert_eq!(counting.fetches.load(Ordering::SeqCst), 1);

    pipeline.refresh(&id);
    pipeline.dataset(&id).unwrap();
    assert_eq!(counting.fetches.load(Ordering::SeqCst), 2);

    pipeline.refresh_all();
    pipeline.dataset(&id).unwrap();
    assert_eq!(counting.fetches.load(Ordering::SeqCst), 3);
}

#[test]
fn failed_loads_leave_cache_untouched() {
    let src = source();
    let loader = Loader::new(src.clone());
    let cache = CacheStore::new();
    let id = DatasetId::csv("bucket", "missing.csv");

    let err = cache.get_or_load(&id, |id| loader.load(id)).unwrap_err();
    assert!(err.is_source_unavailable());
    assert!(!cache.contains(&id));

    src.put("bucket", "missing.csv", "a,b\n1,2\n");
    assert_eq!(cache.get_or_load(&id, |id| loader.load(id)).unwrap().len(), 1);
}

#[test]
fn filter_soundness_and_completeness() {
    let loader = Loader::new(source());
    let ds = loader.load(&DatasetId::csv("bucket", "Salary_Data_clean.csv")).unwrap();
    let filters = FilterSet::new()
        .with(Filter::in_set("Education Level", ["PhD"]))
        .with(Filter::not_null("Salary"));

    let kept = filtered_indices(&ds, &filters).unwrap();
    let passes = |i: usize| {
        ds.value(i, "Education Level").unwrap() == &Value::from("PhD")
            && !ds.value(i, "Salary").unwrap().is_null()
    };
    for i in 0..ds.len() {
        assert_eq!(kept.contains(&i), passes(i), "row {i}");
    }

    let once = apply(&ds, &filters).unwrap();
    assert_eq!(apply(&once, &filters).unwrap(), once);
    assert_eq!(apply(&ds, &FilterSet::new()).unwrap(), ds);
}

#[test]
fn filesystem_objects_load_through_config() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = dir.path().join("bucket").join("processed");
    std::fs::create_dir_all(&bucket).unwrap();
    std::fs::write(bucket.join("data_procesada.csv"), SERVERS_CSV).unwrap();

    let config = PipelineConfig {
        object_root: dir.path().to_path_buf(),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::from_config(config);

    let id = DatasetId::from_key("bucket", "processed/data_procesada.csv").unwrap();
    let result = pipeline
        .query(&id, &FilterSet::new(), &AggregationRequest::top_n("cpu_usage", 0, SortOrder::Descending))
        .unwrap();
    assert!(result.is_empty);
    assert_eq!(result.row_count_considered, 3);

    let missing = DatasetId::csv("bucket", "processed/other.csv");
    assert!(pipeline.dataset(&missing).unwrap_err().is_source_unavailable());
}

#[test]
fn aggregation_does_not_mutate_cached_dataset() {
    let pipeline = Pipeline::new(source(), PipelineConfig::default());
    let id = DatasetId::from_key("bucket", "clean/artists_combined.parquet").unwrap();
    let before = pipeline.dataset(&id).unwrap();

    let request = AggregationRequest::ratio("lastfm_listeners", "spotify_followers", "r");
    aggregate(&before, &request).unwrap();
    pipeline.query(&id, &FilterSet::new(), &request).unwrap();

    let after = pipeline.dataset(&id).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(after.schema().column("r").is_none());
}
