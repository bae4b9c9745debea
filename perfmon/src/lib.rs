//! Resource monitoring and reporting for database benchmark runs
//!
//! This crate samples CPU, memory and disk I/O in the background while a
//! workload runs, records the workload's milestones as timestamped events,
//! and renders both into a report directory:
//!
//! - [`monitoring`]: the [`Monitor`] session handle, sampler, event log and
//!   metric sources
//! - [`session`]: the finished session and its JSON snapshot format
//! - [`report`]: statistics, event correlation, SVG charts and HTML
//! - [`workload`]: a synthetic workload for end-to-end runs
//! - [`config`]: layered TOML/environment configuration

pub mod config;
pub mod error;
pub mod monitoring;
pub mod report;
pub mod session;
pub mod workload;

pub use config::MonitorConfig;
pub use error::{
    ConfigError, ConfigResult, MetricError, MetricResult, MonitorError, ReportError, ReportResult,
    Result,
};
pub use monitoring::{EventRecorder, Monitor, SampleSource, SourceScope};
pub use report::{generate_report, generate_report_from_snapshot, GeneratedReport, Report};
pub use session::{Event, Metadata, MetadataValue, Sample, Session, SystemInfo};

/// Crate version, recorded in generated reports and CLI output
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
