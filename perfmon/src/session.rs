//! Monitoring session data model and snapshot persistence
//!
//! A [`Session`] is the full record of one monitored run. Snapshots are
//! pretty-printed JSON with these top-level keys:
//!
//! | key              | type                          |
//! |------------------|-------------------------------|
//! | `format_version` | integer, currently `1`        |
//! | `start_time`     | RFC 3339 UTC timestamp        |
//! | `end_time`       | RFC 3339 UTC timestamp / null |
//! | `system_info`    | object, optional              |
//! | `samples`        | array of [`Sample`]           |
//! | `events`         | array of [`Event`]            |
//!
//! Timestamps keep nanosecond precision so a saved session reloads equal to
//! the one that was written.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ReportError, ReportResult, Result};
use crate::monitoring::SourceScope;

/// Current snapshot format version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Monotonic clock anchored at the wall-clock start of a session.
///
/// Every timestamp handed out is `start + elapsed`, so timestamps within a
/// session never run backwards even if the system clock is adjusted.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    wall: DateTime<Utc>,
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            wall: Utc::now(),
            origin: Instant::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.wall
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

/// One timestamped resource-usage reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// CPU usage, 100.0 per fully busy core
    pub cpu_percent: f64,
    /// Resident memory in bytes
    pub memory_bytes: u64,
    /// Cumulative bytes read since the source started counting
    pub disk_read_bytes: u64,
    /// Cumulative bytes written since the source started counting
    pub disk_write_bytes: u64,
    /// Set on sentinel samples: the read failed and the numeric fields are zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

impl Sample {
    /// Sentinel sample recorded when the metric source fails
    pub fn sentinel(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            timestamp,
            cpu_percent: 0.0,
            memory_bytes: 0,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            unavailable: Some(reason.into()),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.unavailable.is_some()
    }
}

/// Scalar metadata value attached to an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(v) => write!(f, "{}", v),
            MetadataValue::Integer(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{:.3}", v),
            MetadataValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(MetadataValue::Integer)
            .unwrap_or(MetadataValue::Float(v as f64))
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::from(v as u64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

/// Event metadata, kept sorted so snapshots are stable
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One timestamped, labeled workload milestone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

/// Host description captured when monitoring starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub kernel_version: String,
    pub cpu_count: usize,
    pub total_memory_bytes: u64,
    pub sample_scope: SourceScope,
}

impl SystemInfo {
    pub fn collect(scope: SourceScope) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();

        Self {
            hostname: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os: sysinfo::System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
            kernel_version: sysinfo::System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
            cpu_count: num_cpus::get(),
            total_memory_bytes: system.total_memory(),
            sample_scope: scope,
        }
    }
}

/// The full record of one monitored run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
    pub samples: Vec<Sample>,
    pub events: Vec<Event>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    #[serde(flatten)]
    session: &'a Session,
}

impl Session {
    /// Instant the session is considered to end: `end_time`, or the latest
    /// recorded timestamp for sessions saved before they were sealed.
    pub fn effective_end(&self) -> DateTime<Utc> {
        if let Some(end) = self.end_time {
            return end;
        }
        let last_sample = self.samples.last().map(|s| s.timestamp);
        let last_event = self.events.last().map(|e| e.timestamp);
        [Some(self.start_time), last_sample, last_event]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.start_time)
    }

    pub fn duration_secs(&self) -> f64 {
        seconds_between(self.start_time, self.effective_end())
    }

    /// Seconds elapsed between session start and `timestamp`
    pub fn offset_secs(&self, timestamp: DateTime<Utc>) -> f64 {
        seconds_between(self.start_time, timestamp)
    }

    /// Write the session as a JSON snapshot, creating parent directories
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // JSON has no NaN or infinity; writing them would produce an unloadable file
        if let Some(record) = self.non_finite_record() {
            return Err(ReportError::malformed(record, "value is not a finite number").into());
        }

        let snapshot = SnapshotRef {
            format_version: SNAPSHOT_FORMAT_VERSION,
            session: self,
        };
        let content = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, content)?;

        info!(
            "Saved snapshot with {} samples and {} events to {}",
            self.samples.len(),
            self.events.len(),
            path.display()
        );
        Ok(())
    }

    fn non_finite_record(&self) -> Option<String> {
        let sample = self
            .samples
            .iter()
            .position(|s| !s.cpu_percent.is_finite())
            .map(|i| format!("samples[{}]", i));
        sample.or_else(|| {
            self.events
                .iter()
                .position(|e| {
                    e.metadata
                        .values()
                        .any(|v| matches!(v, MetadataValue::Float(f) if !f.is_finite()))
                })
                .map(|i| format!("events[{}]", i))
        })
    }

    /// Load and validate a snapshot written by [`Session::save_snapshot`]
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> ReportResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ReportError::SnapshotNotFound {
            path: path.to_string_lossy().to_string(),
        })?;
        let session = Self::from_json(&content)?;
        debug!("Loaded snapshot from {}", path.display());
        Ok(session)
    }

    /// Parse a snapshot document, naming the first offending record on error
    pub fn from_json(content: &str) -> ReportResult<Self> {
        let document: Value =
            serde_json::from_str(content).map_err(|e| ReportError::malformed("document", e))?;
        let root = document
            .as_object()
            .ok_or_else(|| ReportError::malformed("document", "top level is not an object"))?;

        if let Some(version) = root.get("format_version") {
            match version.as_u64() {
                Some(v) if v <= SNAPSHOT_FORMAT_VERSION as u64 => {}
                _ => return Err(ReportError::malformed("format_version", format!("unsupported version {}", version))),
            }
        }

        let start_time: DateTime<Utc> = field(root, "start_time")?;
        let end_time: Option<DateTime<Utc>> = match root.get("end_time") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value(value.clone())
                    .map_err(|e| ReportError::malformed("end_time", e))?,
            ),
        };
        let system_info: Option<SystemInfo> = match root.get("system_info") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value(value.clone())
                    .map_err(|e| ReportError::malformed("system_info", e))?,
            ),
        };

        let samples = records(root, "samples")?;
        let events = records(root, "events")?;

        let session = Session {
            start_time,
            end_time,
            system_info,
            samples,
            events,
        };
        session.validate()?;
        Ok(session)
    }

    /// Check ordering, bounds and label invariants
    pub fn validate(&self) -> ReportResult<()> {
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(ReportError::NonMonotonic {
                    record: "end_time".to_string(),
                });
            }
        }
        let end = self.effective_end();

        let mut previous = self.start_time;
        for (i, sample) in self.samples.iter().enumerate() {
            let record = format!("samples[{}]", i);
            if !sample.cpu_percent.is_finite() || sample.cpu_percent < 0.0 {
                return Err(ReportError::malformed(
                    record,
                    format!("cpu_percent {} is not a non-negative number", sample.cpu_percent),
                ));
            }
            check_timestamp(sample.timestamp, previous, self.start_time, end, record)?;
            previous = sample.timestamp;
        }

        let mut previous = self.start_time;
        for (i, event) in self.events.iter().enumerate() {
            let record = format!("events[{}]", i);
            if event.label.trim().is_empty() {
                return Err(ReportError::malformed(record, "empty label"));
            }
            check_timestamp(event.timestamp, previous, self.start_time, end, record)?;
            previous = event.timestamp;
        }

        Ok(())
    }
}

fn check_timestamp(
    timestamp: DateTime<Utc>,
    previous: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    record: String,
) -> ReportResult<()> {
    if timestamp < start || timestamp > end {
        return Err(ReportError::OutOfBounds { record });
    }
    if timestamp < previous {
        return Err(ReportError::NonMonotonic { record });
    }
    Ok(())
}

fn field<T: serde::de::DeserializeOwned>(
    root: &serde_json::Map<String, Value>,
    key: &str,
) -> ReportResult<T> {
    let value = root
        .get(key)
        .ok_or_else(|| ReportError::malformed(key, "missing required key"))?;
    serde_json::from_value(value.clone()).map_err(|e| ReportError::malformed(key, e))
}

fn records<T: serde::de::DeserializeOwned>(
    root: &serde_json::Map<String, Value>,
    key: &str,
) -> ReportResult<Vec<T>> {
    let array = root
        .get(key)
        .ok_or_else(|| ReportError::malformed(key, "missing required key"))?
        .as_array()
        .ok_or_else(|| ReportError::malformed(key, "expected an array"))?;

    array
        .iter()
        .enumerate()
        .map(|(i, value)| {
            serde_json::from_value(value.clone())
                .map_err(|e| ReportError::malformed(format!("{}[{}]", key, i), e))
        })
        .collect()
}

pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1_000_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}
