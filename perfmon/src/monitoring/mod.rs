//! Resource monitoring for benchmark runs
//!
//! A [`Monitor`] is the handle for one monitoring session. The workload
//! brackets its run with [`Monitor::start`] and [`Monitor::stop`] and marks
//! milestones with [`Monitor::record_event`]:
//!
//! ```no_run
//! # async fn run() -> perfmon::Result<()> {
//! use perfmon::monitoring::{source_for_scope, Monitor, SourceScope};
//!
//! let source = source_for_scope(SourceScope::Process)?;
//! let monitor = Monitor::start(0.5, source)?;
//! monitor.record_event("load_start")?;
//! // ... load data ...
//! monitor.record_event("load_end")?;
//! let session = monitor.stop().await?;
//! session.save_snapshot("perf/snapshot.json")?;
//! # Ok(())
//! # }
//! ```

pub mod event_log;
pub mod sample_source;
pub mod sampler;

pub use event_log::{EventLog, EventRecorder};
pub use sample_source::{source_for_scope, HostSource, ProcessSource, Reading, SampleSource, SourceScope};
pub use sampler::{interval_from_secs, Sampler};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::session::{Event, Metadata, Session, SessionClock, SystemInfo};

#[derive(Debug, Default)]
struct MonitorState {
    sampler: Option<Sampler>,
    /// Outcome of the first `stop`, replayed by later calls
    sealed: Option<std::result::Result<Session, String>>,
}

/// One monitoring session: a background sampler plus an event log
#[derive(Debug)]
pub struct Monitor {
    clock: SessionClock,
    system_info: SystemInfo,
    interval: Duration,
    events: Arc<EventLog>,
    recorder: EventRecorder,
    collected: Arc<AtomicU64>,
    state: Mutex<MonitorState>,
}

impl Monitor {
    /// Start sampling `source` every `interval_secs` seconds.
    ///
    /// Returns as soon as the sampling task is spawned. Must be called from
    /// within a tokio runtime.
    pub fn start(interval_secs: f64, source: Box<dyn SampleSource>) -> Result<Self> {
        let interval = interval_from_secs(interval_secs)?;
        let system_info = SystemInfo::collect(source.scope());

        let clock = SessionClock::start();
        let sampler = Sampler::spawn(source, clock, interval)?;
        let collected = sampler.counter();
        let events = Arc::new(EventLog::new(clock));

        info!(
            "Monitoring session started at {} ({} scope, every {:?})",
            clock.started_at(),
            system_info.sample_scope,
            interval
        );

        Ok(Self {
            clock,
            system_info,
            interval,
            recorder: EventRecorder::new(events.clone()),
            events,
            collected,
            state: Mutex::new(MonitorState {
                sampler: Some(sampler),
                sealed: None,
            }),
        })
    }

    /// Start with the interval and scope from a validated configuration
    pub fn start_with_config(config: &MonitorConfig) -> Result<Self> {
        config.validate()?;
        let source = source_for_scope(config.sampling.scope)?;
        Self::start(config.sampling.interval_secs, source)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.clock.started_at()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.system_info
    }

    /// Samples captured so far
    pub fn sample_count(&self) -> u64 {
        self.collected.load(Ordering::Relaxed)
    }

    /// Events recorded so far
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_sealed()
    }

    /// Handle for recording events from other threads or tasks
    pub fn recorder(&self) -> EventRecorder {
        self.recorder.clone()
    }

    pub fn record_event(&self, label: impl AsRef<str>) -> Result<Event> {
        self.recorder.record_event(label)
    }

    pub fn record_event_with(&self, label: impl AsRef<str>, metadata: Metadata) -> Result<Event> {
        self.recorder.record_event_with(label, metadata)
    }

    /// See [`EventRecorder::time_operation`]
    pub fn time_operation<T>(&self, name: &str, operation: impl FnOnce() -> T) -> Result<(T, Duration)> {
        self.recorder.time_operation(name, operation)
    }

    /// See [`EventRecorder::time_async`]
    pub async fn time_async<F, T>(&self, name: &str, operation: F) -> Result<(T, Duration)>
    where
        F: Future<Output = T>,
    {
        self.recorder.time_async(name, operation).await
    }

    /// Stop sampling and seal the session.
    ///
    /// Blocks until the in-flight tick, if any, completes. Calling `stop`
    /// again returns the same outcome: the sealed session, or the same
    /// sampler failure.
    pub async fn stop(&self) -> Result<Session> {
        let mut state = self.state.lock().await;
        match &state.sealed {
            Some(Ok(session)) => return Ok(session.clone()),
            Some(Err(reason)) => return Err(MonitorError::SamplerFailed(reason.clone())),
            None => {}
        }

        let stopped = match state.sampler.take() {
            Some(sampler) => sampler.stop().await,
            None => Ok(Vec::new()),
        };

        // Sealed after the sampler has finished, so every sample precedes end_time
        let (end_time, events) = self.events.seal();
        let samples = match stopped {
            Ok(samples) => samples,
            Err(e) => {
                error!("Sampler did not shut down cleanly: {}", e);
                let reason = match e {
                    MonitorError::SamplerFailed(reason) => reason,
                    other => other.to_string(),
                };
                state.sealed = Some(Err(reason.clone()));
                return Err(MonitorError::SamplerFailed(reason));
            }
        };

        let session = Session {
            start_time: self.clock.started_at(),
            end_time: Some(end_time),
            system_info: Some(self.system_info.clone()),
            samples,
            events,
        };
        info!(
            "Monitoring session sealed: {} samples, {} events over {:.2}s",
            session.samples.len(),
            session.events.len(),
            session.duration_secs()
        );
        state.sealed = Some(Ok(session.clone()));
        Ok(session)
    }
}
