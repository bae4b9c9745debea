//! Instantaneous resource readings for the sampler
//!
//! Two scopes are available: the monitored process itself, or the whole
//! host. Disk counters are cumulative; the report turns them into rates.

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use crate::error::{MetricError, MetricResult};
use crate::session::Sample;

/// Bytes per sector in `/proc/diskstats`, independent of the device's real
/// sector size.
#[cfg(target_os = "linux")]
const DISKSTATS_SECTOR_BYTES: u64 = 512;

/// Which resources a source observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceScope {
    /// Only the current process
    #[default]
    Process,
    /// The whole machine
    Host,
}

impl std::fmt::Display for SourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceScope::Process => write!(f, "process"),
            SourceScope::Host => write!(f, "host"),
        }
    }
}

impl std::str::FromStr for SourceScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "process" => Ok(SourceScope::Process),
            "host" => Ok(SourceScope::Host),
            other => Err(format!("unknown sample scope '{}', expected 'process' or 'host'", other)),
        }
    }
}

/// The metric fields of one sample, before a timestamp is attached
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
}

impl Reading {
    pub fn into_sample(self, timestamp: chrono::DateTime<chrono::Utc>) -> Sample {
        Sample {
            timestamp,
            cpu_percent: self.cpu_percent,
            memory_bytes: self.memory_bytes,
            disk_read_bytes: self.disk_read_bytes,
            disk_write_bytes: self.disk_write_bytes,
            unavailable: None,
        }
    }
}

/// A capability to read resource metrics.
///
/// Implementations may fail with a [`MetricError`]; the sampler records a
/// sentinel sample and keeps going.
pub trait SampleSource: Send {
    fn read(&mut self) -> MetricResult<Reading>;

    fn scope(&self) -> SourceScope;
}

/// Build the source for a configured scope
pub fn source_for_scope(scope: SourceScope) -> MetricResult<Box<dyn SampleSource>> {
    Ok(match scope {
        SourceScope::Process => Box::new(ProcessSource::current()?),
        SourceScope::Host => Box::new(HostSource::new()),
    })
}

/// Resource usage of a single process
pub struct ProcessSource {
    system: System,
    pid: Pid,
}

impl ProcessSource {
    /// Observe the calling process
    pub fn current() -> MetricResult<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| MetricError::Unavailable {
            metric: "pid".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::for_pid(pid))
    }

    pub fn for_pid(pid: Pid) -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first real read has a baseline
        system.refresh_cpu();
        system.refresh_process(pid);
        Self { system, pid }
    }
}

impl SampleSource for ProcessSource {
    fn read(&mut self) -> MetricResult<Reading> {
        self.system.refresh_cpu();
        if !self.system.refresh_process(self.pid) {
            return Err(MetricError::ProcessGone {
                pid: self.pid.as_u32(),
            });
        }

        let process = self.system.process(self.pid).ok_or(MetricError::ProcessGone {
            pid: self.pid.as_u32(),
        })?;
        let disk = process.disk_usage();

        Ok(Reading {
            cpu_percent: process.cpu_usage() as f64,
            memory_bytes: process.memory(),
            disk_read_bytes: disk.total_read_bytes,
            disk_write_bytes: disk.total_written_bytes,
        })
    }

    fn scope(&self) -> SourceScope {
        SourceScope::Process
    }
}

/// Whole-machine resource usage
pub struct HostSource {
    system: System,
}

impl HostSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }

    #[cfg(target_os = "linux")]
    fn disk_counters(&mut self) -> MetricResult<(u64, u64)> {
        let stats = procfs::diskstats().map_err(|e| MetricError::Unavailable {
            metric: "disk_io".to_string(),
            reason: e.to_string(),
        })?;

        Ok(stats
            .iter()
            .filter(|stat| is_whole_device(&stat.name))
            .fold((0u64, 0u64), |(read, written), stat| {
                (
                    read + stat.sectors_read as u64 * DISKSTATS_SECTOR_BYTES,
                    written + stat.sectors_written as u64 * DISKSTATS_SECTOR_BYTES,
                )
            }))
    }

    #[cfg(not(target_os = "linux"))]
    fn disk_counters(&mut self) -> MetricResult<(u64, u64)> {
        self.system.refresh_processes();
        Ok(self
            .system
            .processes()
            .values()
            .map(|p| p.disk_usage())
            .fold((0u64, 0u64), |(read, written), usage| {
                (
                    read + usage.total_read_bytes,
                    written + usage.total_written_bytes,
                )
            }))
    }
}

impl Default for HostSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for HostSource {
    fn read(&mut self) -> MetricResult<Reading> {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cores = self.system.cpus().len().max(1) as f64;
        let cpu_percent = self.system.global_cpu_info().cpu_usage() as f64 * cores;
        let (disk_read_bytes, disk_write_bytes) = self.disk_counters()?;

        Ok(Reading {
            cpu_percent,
            memory_bytes: self.system.used_memory(),
            disk_read_bytes,
            disk_write_bytes,
        })
    }

    fn scope(&self) -> SourceScope {
        SourceScope::Host
    }
}

/// Partitions are listed in `/proc/diskstats` alongside their parent device;
/// only entries with a `/sys/block` node are whole devices.
#[cfg(target_os = "linux")]
fn is_whole_device(name: &str) -> bool {
    if name.starts_with("loop") || name.starts_with("ram") {
        return false;
    }
    std::path::Path::new("/sys/block").join(name).exists()
}
