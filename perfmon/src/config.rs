//! Configuration management for perfmon
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `PERFMON_*` environment variables. The monitor itself only consumes
//! the sampling section; the rest drives the CLI and the demo workload.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::monitoring::{interval_from_secs, SourceScope};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling configuration
    pub sampling: SamplingConfig,

    /// Where snapshots and reports go
    pub output: OutputConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Synthetic workload configuration
    pub workload: WorkloadConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds between samples, fractional values allowed
    pub interval_secs: f64,

    /// Observe the current process or the whole host
    pub scope: SourceScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Base directory for snapshots and reports
    pub directory: PathBuf,

    /// Snapshot file name; a timestamped name is used when unset
    pub snapshot_file: Option<String>,

    /// Report directory name inside `directory`
    pub report_dir_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Total rows to generate
    pub rows: u64,

    /// Rows generated per chunk
    pub chunk_size: u64,

    /// Distinct cities in the generated data
    pub cities: u32,

    /// Scratch directory for chunk files; the system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            scope: SourceScope::Process,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./performance_data"),
            snapshot_file: None,
            report_dir_name: "report".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            rows: 10_000_000,
            chunk_size: 1_000_000,
            cities: 1_000,
            scratch_dir: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config = Self::parse_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = MonitorConfig::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load with fallback order: defaults, then file, then environment
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        Self::load_with_lookup(config_path, |key| std::env::var(key).ok())
    }

    /// [`MonitorConfig::load_with_fallback`] with overrides read through
    /// `lookup`. Validation runs once, after overrides are applied.
    pub fn load_with_lookup<P, F>(config_path: Option<P>, lookup: F) -> ConfigResult<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match config_path {
            Some(path) if path.as_ref().exists() => Self::parse_file(path.as_ref())?,
            _ => MonitorConfig::default(),
        };

        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PERFMON_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interval) = lookup("PERFMON_INTERVAL") {
            self.sampling.interval_secs = parse_var("PERFMON_INTERVAL", &interval)?;
        }

        if let Some(scope) = lookup("PERFMON_SCOPE") {
            self.sampling.scope = scope.parse().map_err(|_| ConfigError::InvalidValue {
                field: "PERFMON_SCOPE".to_string(),
                value: scope,
            })?;
        }

        if let Some(directory) = lookup("PERFMON_OUTPUT_DIR") {
            self.output.directory = PathBuf::from(directory);
        }

        if let Some(rows) = lookup("PERFMON_ROW_COUNT") {
            self.workload.rows = parse_var("PERFMON_ROW_COUNT", &rows)?;
        }

        if let Some(level) = lookup("PERFMON_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        interval_from_secs(self.sampling.interval_secs)?;

        let directory = &self.output.directory;
        if directory.as_os_str().is_empty() {
            return Err(ConfigError::InvalidOutputPath {
                path: String::new(),
                reason: "output directory is empty".to_string(),
            });
        }
        if directory.exists() && !directory.is_dir() {
            return Err(ConfigError::InvalidOutputPath {
                path: directory.to_string_lossy().to_string(),
                reason: "exists and is not a directory".to_string(),
            });
        }

        if let Some(name) = &self.output.snapshot_file {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(ConfigError::InvalidOutputPath {
                    path: name.clone(),
                    reason: "snapshot_file must be a plain file name".to_string(),
                });
            }
        }

        if self.output.report_dir_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "output.report_dir_name".to_string(),
                value: String::new(),
            });
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: self.logging.level.clone(),
            });
        }

        if self.workload.rows == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workload.rows".to_string(),
                value: "0".to_string(),
            });
        }

        if self.workload.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workload.chunk_size".to_string(),
                value: "0".to_string(),
            });
        }

        if self.workload.cities == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workload.cities".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// Snapshot location for a run started at `started_at`
    pub fn snapshot_path(&self, started_at: DateTime<Utc>) -> PathBuf {
        let name = self
            .output
            .snapshot_file
            .clone()
            .unwrap_or_else(|| format!("perf_{}.json", started_at.format("%Y%m%d_%H%M%S")));
        self.output.directory.join(name)
    }

    pub fn report_dir(&self) -> PathBuf {
        self.output.directory.join(&self.output.report_dir_name)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("perfmon").join("perfmon.toml"))
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_dir".to_string(),
                value: "unavailable".to_string(),
            })
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::WriteFailed { reason: e.to_string() })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::WriteFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        fs::write(path, self.to_toml()?).map_err(|e| ConfigError::WriteFailed { reason: e.to_string() })
    }
}

fn parse_var<T: std::str::FromStr>(field: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}
