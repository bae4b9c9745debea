//! Error handling for the performance monitor
//!
//! Three failure families exist, matching how each one propagates:
//! configuration errors fail fast before monitoring begins, metric errors are
//! recovered inside the sampler, and report errors abort report generation
//! while leaving collected data untouched.

use std::io;

use thiserror::Error;

/// The main error type for the monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Invalid configuration, surfaced synchronously to the caller
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A metric read failed
    #[error("Metric unavailable: {0}")]
    Metric(#[from] MetricError),

    /// Report synthesis failed
    #[error("Report generation error: {0}")]
    Report(#[from] ReportError),

    /// Event labels must contain at least one non-whitespace character
    #[error("Event label must not be empty")]
    EmptyLabel,

    /// Snapshots store JSON numbers, which cannot hold NaN or infinity
    #[error("Metadata value '{key}' is not a finite number")]
    NonFiniteMetadata { key: String },

    /// The session has been sealed by `stop()`
    #[error("Monitoring session is closed")]
    SessionClosed,

    /// The background sampling task panicked or was aborted
    #[error("Sampler task failed: {0}")]
    SamplerFailed(String),

    /// The synthetic workload could not finish
    #[error("Workload failed: {0}")]
    Workload(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Sampling interval must be a positive number of seconds, got {value}")]
    InvalidInterval { value: f64 },

    #[error("Invalid output path: {path} ({reason})")]
    InvalidOutputPath { path: String, reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Configuration could not be written: {reason}")]
    WriteFailed { reason: String },

    #[error("Monitoring requires a running tokio runtime")]
    NoRuntime,
}

/// Metric read failures. Recoverable by the sampler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("{metric} unavailable: {reason}")]
    Unavailable { metric: String, reason: String },

    #[error("process {pid} is no longer visible")]
    ProcessGone { pid: u32 },
}

/// Report generation errors
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Malformed snapshot at {record}: {reason}")]
    MalformedSnapshot { record: String, reason: String },

    #[error("Timestamps go backwards at {record}")]
    NonMonotonic { record: String },

    #[error("{record} lies outside the session bounds")]
    OutOfBounds { record: String },

    #[error("Failed to render {artifact}: {reason}")]
    Render { artifact: String, reason: String },

    #[error("Snapshot not found: {path}")]
    SnapshotNotFound { path: String },

    #[error("I/O error while writing report: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for metric reads
pub type MetricResult<T> = std::result::Result<T, MetricError>;

/// A specialized result type for report operations
pub type ReportResult<T> = std::result::Result<T, ReportError>;

impl MonitorError {
    /// Check if the monitor can keep going after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Metric(_) => true,
            MonitorError::EmptyLabel => true,
            MonitorError::NonFiniteMetadata { .. } => true,
            MonitorError::Config(_) => false,
            MonitorError::SessionClosed => false,
            MonitorError::SamplerFailed(_) => false,
            MonitorError::Workload(_) => false,
            MonitorError::Report(_) => false,
            MonitorError::Io(io_error) => {
                matches!(io_error.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
            }
            MonitorError::Serialization(_) => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "config",
            MonitorError::Metric(_) => "metric",
            MonitorError::Report(_) => "report",
            MonitorError::EmptyLabel => "event",
            MonitorError::NonFiniteMetadata { .. } => "event",
            MonitorError::SessionClosed => "session",
            MonitorError::SamplerFailed(_) => "sampler",
            MonitorError::Workload(_) => "workload",
            MonitorError::Io(_) => "io",
            MonitorError::Serialization(_) => "serialization",
        }
    }
}

impl ReportError {
    pub(crate) fn malformed(record: impl Into<String>, reason: impl ToString) -> Self {
        ReportError::MalformedSnapshot {
            record: record.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn render(artifact: impl Into<String>, reason: impl ToString) -> Self {
        ReportError::Render {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }
}
