//! Synthetic weather-data workload
//!
//! Stands in for a database benchmark when exercising the monitor end to
//! end. Rows are generated in chunks and appended to a scratch file, then a
//! fixed set of aggregation queries scans that file. Every phase is bracketed
//! with start/end events so the report can correlate it with resource usage.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::WorkloadConfig;
use crate::error::{MonitorError, Result};
use crate::monitoring::{EventRecorder, Monitor};
use crate::session::{Metadata, MetadataValue};

const ROW_BYTES: usize = 17;
const TOP_N: usize = 10;
const SEED: u64 = 0x5eed_1b2c;

/// One generated observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherRow {
    pub city: u32,
    pub temperature_c: f32,
    pub humidity_pct: u8,
    pub pressure_hpa: f32,
    pub wind_speed_kmh: f32,
}

impl WeatherRow {
    fn random(rng: &mut StdRng, cities: u32) -> Self {
        Self {
            city: rng.gen_range(0..cities),
            temperature_c: rng.gen_range(-20.0..30.0),
            humidity_pct: rng.gen_range(0..=100),
            pressure_hpa: rng.gen_range(975.0..1025.0),
            wind_speed_kmh: rng.gen_range(0.0..100.0),
        }
    }

    fn encode(&self) -> [u8; ROW_BYTES] {
        let mut buf = [0u8; ROW_BYTES];
        buf[0..4].copy_from_slice(&self.city.to_le_bytes());
        buf[4..8].copy_from_slice(&self.temperature_c.to_le_bytes());
        buf[8] = self.humidity_pct;
        buf[9..13].copy_from_slice(&self.pressure_hpa.to_le_bytes());
        buf[13..17].copy_from_slice(&self.wind_speed_kmh.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; ROW_BYTES]) -> Self {
        let word = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        Self {
            city: u32::from_le_bytes(word(0)),
            temperature_c: f32::from_le_bytes(word(4)),
            humidity_pct: buf[8],
            pressure_hpa: f32::from_le_bytes(word(9)),
            wind_speed_kmh: f32::from_le_bytes(word(13)),
        }
    }

    /// Conditions counted by the filtered query
    fn is_extreme(&self) -> bool {
        self.temperature_c < -15.0
            || self.temperature_c > 25.0
            || self.wind_speed_kmh > 90.0
            || (self.humidity_pct > 95 && self.temperature_c > 20.0)
    }
}

/// Result of one timed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub name: String,
    pub duration_ms: f64,
    pub result: String,
}

/// What a workload run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSummary {
    pub rows: u64,
    pub chunks: u64,
    pub scratch_bytes: u64,
    pub queries: Vec<QueryOutcome>,
}

/// Run the workload, recording events on `monitor`.
///
/// The CPU-bound work runs on the blocking pool so the sampler keeps its
/// cadence.
pub async fn run(config: &WorkloadConfig, monitor: &Monitor) -> Result<WorkloadSummary> {
    let config = config.clone();
    let recorder = monitor.recorder();

    tokio::task::spawn_blocking(move || run_blocking(&config, &recorder))
        .await
        .map_err(|e| MonitorError::Workload(e.to_string()))?
}

/// Synchronous body of [`run`]
pub fn run_blocking(config: &WorkloadConfig, recorder: &EventRecorder) -> Result<WorkloadSummary> {
    if config.rows == 0 || config.chunk_size == 0 || config.cities == 0 {
        return Err(MonitorError::Workload(
            "rows, chunk_size and cities must all be positive".to_string(),
        ));
    }

    let chunks = config.rows.div_ceil(config.chunk_size);
    let mut metadata = Metadata::new();
    metadata.insert("rows".to_string(), MetadataValue::from(config.rows));
    metadata.insert("chunks".to_string(), MetadataValue::from(chunks));
    recorder.record_event_with("workload_configured", metadata)?;
    info!("Generating {} rows in {} chunks", config.rows, chunks);

    let scratch = match &config.scratch_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            NamedTempFile::new_in(dir)?
        }
        None => NamedTempFile::new()?,
    };

    generate(config, chunks, scratch.path(), recorder)?;
    let scratch_bytes = scratch.as_file().metadata()?.len();

    let queries = run_queries(scratch.path(), recorder)?;
    recorder.record_event("workload_complete")?;

    Ok(WorkloadSummary {
        rows: config.rows,
        chunks,
        scratch_bytes,
        queries,
    })
}

fn generate(config: &WorkloadConfig, chunks: u64, path: &Path, recorder: &EventRecorder) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut writer = BufWriter::new(File::create(path)?);

    for chunk in 0..chunks {
        let remaining = config.rows - chunk * config.chunk_size;
        let rows = remaining.min(config.chunk_size);

        let (written, elapsed) = recorder.time_operation(&format!("generate_chunk_{}", chunk), || {
            write_chunk(&mut writer, &mut rng, rows, config.cities)
        })?;
        written?;
        debug!("Chunk {} ({} rows) written in {:.2?}", chunk, rows, elapsed);
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn write_chunk<W: Write>(writer: &mut W, rng: &mut StdRng, rows: u64, cities: u32) -> io::Result<()> {
    for _ in 0..rows {
        writer.write_all(&WeatherRow::random(rng, cities).encode())?;
    }
    Ok(())
}

/// Feed every row in the scratch file to `visit`
fn scan(path: &Path, mut visit: impl FnMut(&WeatherRow)) -> io::Result<u64> {
    let mut reader = BufReader::with_capacity(1 << 20, File::open(path)?);
    let mut buf = [0u8; ROW_BYTES];
    let mut rows = 0;

    loop {
        match reader.read_exact(&mut buf) {
            Ok(()) => {
                visit(&WeatherRow::decode(&buf));
                rows += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(rows),
            Err(e) => return Err(e),
        }
    }
}

type QueryFn = fn(&Path) -> io::Result<String>;

fn run_queries(path: &Path, recorder: &EventRecorder) -> Result<Vec<QueryOutcome>> {
    let queries: [(&str, QueryFn); 5] = [
        ("query_count", count_rows),
        ("query_extreme_weather", count_extreme),
        ("query_avg_temperature_by_city", avg_temperature_by_city),
        ("query_hottest_readings", hottest_readings),
        ("query_min_max_by_city", min_max_by_city),
    ];

    let mut outcomes = Vec::with_capacity(queries.len());
    for (name, query) in queries {
        let (result, elapsed): (io::Result<String>, Duration) = recorder.time_operation(name, || query(path))?;
        let result = result?;
        info!("{} finished in {:.2?}: {}", name, elapsed, result);
        outcomes.push(QueryOutcome {
            name: name.to_string(),
            duration_ms: elapsed.as_secs_f64() * 1_000.0,
            result,
        });
    }
    Ok(outcomes)
}

fn count_rows(path: &Path) -> io::Result<String> {
    let rows = scan(path, |_| {})?;
    Ok(format!("{} rows", rows))
}

fn count_extreme(path: &Path) -> io::Result<String> {
    let mut extreme = 0u64;
    scan(path, |row| {
        if row.is_extreme() {
            extreme += 1;
        }
    })?;
    Ok(format!("{} extreme readings", extreme))
}

fn avg_temperature_by_city(path: &Path) -> io::Result<String> {
    let mut totals: HashMap<u32, (f64, u64)> = HashMap::new();
    scan(path, |row| {
        let entry = totals.entry(row.city).or_insert((0.0, 0));
        entry.0 += f64::from(row.temperature_c);
        entry.1 += 1;
    })?;

    let mut averages: Vec<(u32, f64)> = totals
        .into_iter()
        .map(|(city, (sum, count))| (city, sum / count as f64))
        .collect();
    averages.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let top = averages
        .iter()
        .take(3)
        .map(|(city, avg)| format!("city_{}={:.2}", city, avg))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("{} cities, warmest: {}", averages.len(), top))
}

#[derive(Debug, PartialEq)]
struct Hottest(f32, u32);

impl Eq for Hottest {}

impl PartialOrd for Hottest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hottest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

fn hottest_readings(path: &Path) -> io::Result<String> {
    // min-heap of the current top N
    let mut heap: BinaryHeap<Reverse<Hottest>> = BinaryHeap::with_capacity(TOP_N + 1);
    scan(path, |row| {
        heap.push(Reverse(Hottest(row.temperature_c, row.city)));
        if heap.len() > TOP_N {
            heap.pop();
        }
    })?;

    let mut top: Vec<Hottest> = heap.into_iter().map(|Reverse(h)| h).collect();
    top.sort_by(|a, b| b.cmp(a));
    Ok(match top.first() {
        Some(Hottest(temp, city)) => format!("top {} readings, max {:.2} at city_{}", top.len(), temp, city),
        None => "no readings".to_string(),
    })
}

fn min_max_by_city(path: &Path) -> io::Result<String> {
    let mut ranges: HashMap<u32, (f32, f32)> = HashMap::new();
    scan(path, |row| {
        let t = row.temperature_c;
        ranges
            .entry(row.city)
            .and_modify(|(lo, hi)| {
                *lo = lo.min(t);
                *hi = hi.max(t);
            })
            .or_insert((t, t));
    })?;

    let widest = ranges
        .iter()
        .map(|(city, (lo, hi))| (*city, hi - lo))
        .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
    Ok(match widest {
        Some((city, spread)) => format!("{} cities, widest range {:.2} at city_{}", ranges.len(), spread, city),
        None => "no cities".to_string(),
    })
}
