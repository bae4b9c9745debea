use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use perfmon::error::{MetricError, MetricResult};
use perfmon::monitoring::{Reading, SampleSource, SourceScope};

/// One scripted tick outcome
#[derive(Debug, Clone)]
pub enum Step {
    Read(Reading),
    Fail(String),
    Panic,
}

/// Metric source that replays a script, then repeats its fallback reading
#[derive(Debug)]
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    fallback: Reading,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            fallback: steady_reading(10.0, 32 << 20),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A source that always returns the same reading
    pub fn steady(cpu_percent: f64, memory_bytes: u64) -> Self {
        let mut source = Self::new(Vec::new());
        source.fallback = steady_reading(cpu_percent, memory_bytes);
        source
    }

    /// Fails on the given 1-based ticks, succeeds otherwise
    pub fn failing_on(ticks: &[usize], total: usize) -> Self {
        let steps = (1..=total)
            .map(|tick| {
                if ticks.contains(&tick) {
                    Step::Fail(format!("scripted failure on tick {}", tick))
                } else {
                    Step::Read(steady_reading(tick as f64, tick as u64 * 1024))
                }
            })
            .collect();
        Self::new(steps)
    }

    /// Shared read counter, usable after the source moves into a monitor
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl SampleSource for ScriptedSource {
    fn read(&mut self) -> MetricResult<Reading> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Read(reading)) => Ok(reading),
            Some(Step::Fail(reason)) => Err(MetricError::Unavailable {
                metric: "scripted".to_string(),
                reason,
            }),
            Some(Step::Panic) => panic!("scripted source panic"),
            None => Ok(self.fallback),
        }
    }

    fn scope(&self) -> SourceScope {
        SourceScope::Process
    }
}

/// Source whose reads take a fixed time, for stop-latency checks
#[derive(Debug)]
pub struct SlowSource {
    pub delay: Duration,
    disk_bytes: u64,
}

impl SlowSource {
    pub fn new(delay: Duration) -> Self {
        Self { delay, disk_bytes: 0 }
    }
}

impl SampleSource for SlowSource {
    fn read(&mut self) -> MetricResult<Reading> {
        std::thread::sleep(self.delay);
        self.disk_bytes += 4096;
        Ok(Reading {
            cpu_percent: 50.0,
            memory_bytes: 64 << 20,
            disk_read_bytes: self.disk_bytes,
            disk_write_bytes: self.disk_bytes / 2,
        })
    }

    fn scope(&self) -> SourceScope {
        SourceScope::Host
    }
}

pub fn steady_reading(cpu_percent: f64, memory_bytes: u64) -> Reading {
    Reading {
        cpu_percent,
        memory_bytes,
        disk_read_bytes: 0,
        disk_write_bytes: 0,
    }
}
