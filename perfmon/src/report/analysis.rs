//! Summary statistics and event correlation for a finished session

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::warn;

use crate::error::ReportResult;
use crate::session::{seconds_between, Event, Sample, Session, SystemInfo};

pub const CPU_METRIC: &str = "cpu_percent";
pub const MEMORY_METRIC: &str = "memory_bytes";
pub const DISK_READ_METRIC: &str = "disk_read_bytes_per_sec";
pub const DISK_WRITE_METRIC: &str = "disk_write_bytes_per_sec";

/// Min, max, mean and p95 of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub p95: f64,
}

impl MetricSummary {
    /// `None` for an empty series
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let std_dev = Statistics::std_dev(values.iter());
        let mut data = Data::new(values.to_vec());

        Some(Self {
            count: values.len(),
            min: Statistics::min(values.iter()),
            max: Statistics::max(values.iter()),
            mean: Statistics::mean(values.iter()),
            std_dev: if std_dev.is_finite() { std_dev } else { 0.0 },
            p95: data.percentile(95),
        })
    }
}

/// A metric over time, with offsets in seconds from session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub name: String,
    pub unit: String,
    pub points: Vec<(f64, f64)>,
    pub summary: Option<MetricSummary>,
}

impl MetricSeries {
    fn new(name: &str, unit: &str, points: Vec<(f64, f64)>) -> Self {
        let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            summary: MetricSummary::from_values(&values),
            points,
        }
    }
}

/// Bytes moved during the session according to the cumulative counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskTotals {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// A span between a `*_start` event and its matching `*_end` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub name: String,
    pub start_offset_secs: f64,
    pub end_offset_secs: f64,
    pub duration_secs: f64,
    /// Indices into the session's events
    pub start_event: usize,
    pub end_event: usize,
}

/// An event shown as a single point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub label: String,
    pub offset_secs: f64,
    pub event: usize,
    /// A start or end boundary that found no partner
    pub unmatched: bool,
}

/// Durations of every interval sharing a name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub name: String,
    pub count: usize,
    pub total_secs: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub offset_secs: f64,
    pub label: String,
    pub metadata: String,
}

/// Derived, read-only view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub system_info: Option<SystemInfo>,
    pub sample_count: usize,
    pub unavailable_samples: usize,
    pub metrics: Vec<MetricSeries>,
    pub disk_totals: DiskTotals,
    pub intervals: Vec<Interval>,
    pub operations: Vec<OperationSummary>,
    pub markers: Vec<Marker>,
    pub timeline: Vec<TimelineEntry>,
}

impl Report {
    /// Validate `session` and compute every summary
    pub fn from_session(session: &Session) -> ReportResult<Self> {
        session.validate()?;

        let available: Vec<&Sample> = session.samples.iter().filter(|s| !s.is_sentinel()).collect();
        let unavailable_samples = session.samples.len() - available.len();
        if unavailable_samples > 0 {
            warn!("{} sentinel samples excluded from statistics", unavailable_samples);
        }

        let offset = |sample: &Sample| session.offset_secs(sample.timestamp);

        let cpu = MetricSeries::new(
            CPU_METRIC,
            "%",
            available.iter().map(|s| (offset(s), s.cpu_percent)).collect(),
        );
        let memory = MetricSeries::new(
            MEMORY_METRIC,
            "bytes",
            available.iter().map(|s| (offset(s), s.memory_bytes as f64)).collect(),
        );

        let (rates, disk_totals) = disk_rates(session, &available);
        let disk_read = MetricSeries::new(
            DISK_READ_METRIC,
            "bytes/s",
            rates.iter().map(|r| (r.offset_secs, r.read_per_sec)).collect(),
        );
        let disk_write = MetricSeries::new(
            DISK_WRITE_METRIC,
            "bytes/s",
            rates.iter().map(|r| (r.offset_secs, r.write_per_sec)).collect(),
        );

        let (intervals, markers) = pair_events(session);
        let operations = summarize_operations(&intervals);

        let timeline = session
            .events
            .iter()
            .map(|event| TimelineEntry {
                offset_secs: session.offset_secs(event.timestamp),
                label: event.label.clone(),
                metadata: event
                    .metadata
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();

        Ok(Self {
            generated_at: Utc::now(),
            start_time: session.start_time,
            end_time: session.effective_end(),
            duration_secs: session.duration_secs(),
            system_info: session.system_info.clone(),
            sample_count: session.samples.len(),
            unavailable_samples,
            metrics: vec![cpu, memory, disk_read, disk_write],
            disk_totals,
            intervals,
            operations,
            markers,
            timeline,
        })
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSeries> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// First interval with this name
    pub fn interval(&self, name: &str) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.name == name)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationSummary> {
        self.operations.iter().find(|o| o.name == name)
    }
}

struct DiskRate {
    offset_secs: f64,
    read_per_sec: f64,
    write_per_sec: f64,
}

/// Per-interval rates and totals from cumulative counters. A counter that
/// goes backwards (source restart, wraparound) contributes zero. Bytes moved
/// between samples sharing a timestamp count toward the totals and are
/// carried into the next rate point.
fn disk_rates(session: &Session, samples: &[&Sample]) -> (Vec<DiskRate>, DiskTotals) {
    let mut rates = Vec::new();
    let mut totals = DiskTotals::default();
    let (mut pending_read, mut pending_write) = (0u64, 0u64);

    for pair in samples.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let read_bytes = next.disk_read_bytes.saturating_sub(prev.disk_read_bytes);
        let write_bytes = next.disk_write_bytes.saturating_sub(prev.disk_write_bytes);
        totals.read_bytes += read_bytes;
        totals.write_bytes += write_bytes;
        pending_read += read_bytes;
        pending_write += write_bytes;

        let elapsed = seconds_between(prev.timestamp, next.timestamp);
        if elapsed <= 0.0 {
            continue;
        }
        rates.push(DiskRate {
            offset_secs: session.offset_secs(next.timestamp),
            read_per_sec: pending_read as f64 / elapsed,
            write_per_sec: pending_write as f64 / elapsed,
        });
        pending_read = 0;
        pending_write = 0;
    }

    (rates, totals)
}

enum Boundary<'a> {
    Start(&'a str),
    End(&'a str),
}

/// Recognizes `<stem>_start`/`<stem>_end` and `start_<stem>`/`end_<stem>`
fn classify(label: &str) -> Option<Boundary<'_>> {
    if let Some(stem) = label.strip_suffix("_start").filter(|s| !s.is_empty()) {
        return Some(Boundary::Start(stem));
    }
    if let Some(stem) = label.strip_suffix("_end").filter(|s| !s.is_empty()) {
        return Some(Boundary::End(stem));
    }
    if let Some(stem) = label.strip_prefix("start_").filter(|s| !s.is_empty()) {
        return Some(Boundary::Start(stem));
    }
    if let Some(stem) = label.strip_prefix("end_").filter(|s| !s.is_empty()) {
        return Some(Boundary::End(stem));
    }
    None
}

/// Pair boundary events by stem, first-in first-out. Everything left over
/// becomes an instantaneous marker.
pub fn pair_events(session: &Session) -> (Vec<Interval>, Vec<Marker>) {
    let events: &[Event] = &session.events;
    let mut open: HashMap<&str, VecDeque<usize>> = HashMap::new();
    let mut intervals = Vec::new();
    let mut markers = Vec::new();

    let marker = |index: usize, unmatched: bool| Marker {
        label: events[index].label.clone(),
        offset_secs: session.offset_secs(events[index].timestamp),
        event: index,
        unmatched,
    };

    for (index, event) in events.iter().enumerate() {
        match classify(&event.label) {
            Some(Boundary::Start(stem)) => open.entry(stem).or_default().push_back(index),
            Some(Boundary::End(stem)) => match open.get_mut(stem).and_then(|q| q.pop_front()) {
                Some(start) => {
                    let start_offset = session.offset_secs(events[start].timestamp);
                    let end_offset = session.offset_secs(event.timestamp);
                    intervals.push(Interval {
                        name: stem.to_string(),
                        start_offset_secs: start_offset,
                        end_offset_secs: end_offset,
                        duration_secs: end_offset - start_offset,
                        start_event: start,
                        end_event: index,
                    });
                }
                None => {
                    warn!("End event '{}' has no matching start", event.label);
                    markers.push(marker(index, true));
                }
            },
            None => markers.push(marker(index, false)),
        }
    }

    for index in open.into_values().flatten() {
        warn!("Start event '{}' has no matching end", events[index].label);
        markers.push(marker(index, true));
    }

    intervals.sort_by_key(|i| i.start_event);
    markers.sort_by_key(|m| m.event);
    (intervals, markers)
}

/// Group intervals by name in order of first appearance
pub fn summarize_operations(intervals: &[Interval]) -> Vec<OperationSummary> {
    let mut order: Vec<&str> = Vec::new();
    let mut durations: HashMap<&str, Vec<f64>> = HashMap::new();

    for interval in intervals {
        let entry = durations.entry(interval.name.as_str()).or_insert_with(|| {
            order.push(interval.name.as_str());
            Vec::new()
        });
        entry.push(interval.duration_secs * 1_000.0);
    }

    order
        .into_iter()
        .filter_map(|name| {
            let millis = durations.get(name)?;
            let summary = MetricSummary::from_values(millis)?;
            Some(OperationSummary {
                name: name.to_string(),
                count: summary.count,
                total_secs: millis.iter().sum::<f64>() / 1_000.0,
                mean_ms: summary.mean,
                min_ms: summary.min,
                max_ms: summary.max,
            })
        })
        .collect()
}
