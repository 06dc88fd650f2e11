use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use parquet::arrow::ArrowWriter;

use dash_pipeline::PipelineConfig;

const CONTAINER: &str = "monitoring";
const SERVERS: [(&str, &str); 4] = [
    ("srv-01", "eu-west"),
    ("srv-02", "eu-west"),
    ("srv-03", "us-east"),
    ("srv-04", "ap-south"),
];
const SAMPLES_PER_SERVER: usize = 48;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

/// One monitoring sample.
struct Sample {
    timestamp: NaiveDateTime,
    server_id: &'static str,
    region: &'static str,
    cpu_usage: f64,
    memory_usage: f64,
    status: &'static str,
}

fn status_for(cpu: f64, memory: f64) -> &'static str {
    if cpu > 90.0 || memory > 92.0 {
        "ERROR"
    } else if cpu > 75.0 || memory > 80.0 {
        "WARN"
    } else {
        "OK"
    }
}

fn generate(rng: &mut SimpleRng) -> Result<Vec<Sample>> {
    let start = NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .context("invalid start date")?;

    let mut samples = Vec::with_capacity(SERVERS.len() * SAMPLES_PER_SERVER);
    for step in 0..SAMPLES_PER_SERVER {
        let timestamp = start + Duration::minutes(30 * step as i64);
        for &(server_id, region) in &SERVERS {
            let cpu_usage = (rng.uniform(10.0, 100.0) * 10.0).round() / 10.0;
            let memory_usage = (rng.uniform(30.0, 98.0) * 10.0).round() / 10.0;
            samples.push(Sample {
                timestamp,
                server_id,
                region,
                cpu_usage,
                memory_usage,
                status: status_for(cpu_usage, memory_usage),
            });
        }
    }
    Ok(samples)
}

fn write_csv(path: &Path, samples: &[Sample]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV file")?;
    writer.write_record(["timestamp", "server_id", "cpu_usage", "memory_usage", "status", "region"])?;
    for s in samples {
        writer.write_record([
            s.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            s.server_id.to_string(),
            s.cpu_usage.to_string(),
            s.memory_usage.to_string(),
            s.status.to_string(),
            s.region.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_parquet(path: &Path, samples: &[Sample]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        Field::new("server_id", DataType::Utf8, false),
        Field::new("cpu_usage", DataType::Float64, false),
        Field::new("memory_usage", DataType::Float64, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("region", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(TimestampMillisecondArray::from(
                samples
                    .iter()
                    .map(|s| s.timestamp.and_utc().timestamp_millis())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(samples.iter().map(|s| s.server_id).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(samples.iter().map(|s| s.cpu_usage).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(samples.iter().map(|s| s.memory_usage).collect::<Vec<_>>())),
            Arc::new(StringArray::from(samples.iter().map(|s| s.status).collect::<Vec<_>>())),
            Arc::new(StringArray::from(samples.iter().map(|s| s.region).collect::<Vec<_>>())),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let config = PipelineConfig::from_env().context("reading configuration")?;
    let dir = config.object_root.join(CONTAINER).join("processed");
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut rng = SimpleRng::new(42);
    let samples = generate(&mut rng)?;

    write_csv(&dir.join("servers.csv"), &samples)?;
    write_parquet(&dir.join("servers.parquet"), &samples)?;

    println!(
        "Wrote {} samples for {} servers to {}",
        samples.len(),
        SERVERS.len(),
        dir.display()
    );
    Ok(())
}
