use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use perfmon::session::{Event, Metadata, MetadataValue, Sample, Session, SystemInfo};
use perfmon::SourceScope;

/// Builds sessions with explicit, millisecond-offset timestamps
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    start: DateTime<Utc>,
    end_ms: Option<i64>,
    samples: Vec<Sample>,
    events: Vec<Event>,
    system_info: Option<SystemInfo>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            start: Utc::now(),
            end_ms: None,
            samples: Vec::new(),
            events: Vec::new(),
            system_info: None,
        }
    }

    fn at(&self, ms: i64) -> DateTime<Utc> {
        self.start + Duration::milliseconds(ms)
    }

    pub fn sample(mut self, ms: i64, cpu_percent: f64, memory_bytes: u64, read: u64, write: u64) -> Self {
        self.samples.push(Sample {
            timestamp: self.at(ms),
            cpu_percent,
            memory_bytes,
            disk_read_bytes: read,
            disk_write_bytes: write,
            unavailable: None,
        });
        self
    }

    pub fn sentinel(mut self, ms: i64, reason: &str) -> Self {
        let timestamp = self.at(ms);
        self.samples.push(Sample::sentinel(timestamp, reason));
        self
    }

    pub fn event(self, ms: i64, label: &str) -> Self {
        self.event_with(ms, label, Metadata::new())
    }

    pub fn event_with(mut self, ms: i64, label: &str, metadata: Metadata) -> Self {
        self.events.push(Event {
            timestamp: self.at(ms),
            label: label.to_string(),
            metadata,
        });
        self
    }

    pub fn end(mut self, ms: i64) -> Self {
        self.end_ms = Some(ms);
        self
    }

    pub fn system_info(mut self) -> Self {
        self.system_info = Some(SystemInfo {
            hostname: "bench-host".to_string(),
            os: "Linux 6.1".to_string(),
            kernel_version: "6.1.0".to_string(),
            cpu_count: 8,
            total_memory_bytes: 16 << 30,
            sample_scope: SourceScope::Host,
        });
        self
    }

    /// Ends 10 ms after the last record unless [`SessionBuilder::end`] was set
    pub fn build(self) -> Session {
        let last = self
            .samples
            .iter()
            .map(|s| s.timestamp)
            .chain(self.events.iter().map(|e| e.timestamp))
            .max()
            .unwrap_or(self.start);
        let end = match self.end_ms {
            Some(ms) => self.at(ms),
            None => last + Duration::milliseconds(10),
        };

        Session {
            start_time: self.start,
            end_time: Some(end),
            system_info: self.system_info,
            samples: self.samples,
            events: self.events,
        }
    }
}

/// A plausible benchmark session: a sample every 100 ms with growing
/// memory and disk counters, plus load and query intervals.
pub fn realistic_session(seed: u64, duration_ms: i64) -> Session {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut builder = SessionBuilder::new().system_info();
    let mut read = 0u64;
    let mut write = 0u64;

    for ms in (0..duration_ms).step_by(100) {
        read += rng.gen_range(0..8 << 20);
        write += rng.gen_range(0..4 << 20);
        builder = builder.sample(
            ms,
            rng.gen_range(0.0..400.0),
            (256 << 20) + (ms as u64) * 1024,
            read,
            write,
        );
    }

    let quarter = duration_ms / 4;
    let mut metadata = Metadata::new();
    metadata.insert("rows".to_string(), MetadataValue::Integer(1_000_000));

    builder
        .event_with(0, "load_start", metadata)
        .event(quarter, "load_end")
        .event(quarter + 5, "query_count_start")
        .event(2 * quarter, "query_count_end")
        .event(2 * quarter + 5, "checkpoint")
        .event(3 * quarter, "start_sort")
        .event(duration_ms - 1, "end_sort")
        .end(duration_ms)
        .build()
}
