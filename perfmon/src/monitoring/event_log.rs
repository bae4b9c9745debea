//! Append-only log of workload milestones

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{MonitorError, Result};
use crate::session::{Event, Metadata, MetadataValue, SessionClock};

/// Label suffix opening a timed operation
pub const START_SUFFIX: &str = "_start";
/// Label suffix closing a timed operation
pub const END_SUFFIX: &str = "_end";

#[derive(Debug, Default)]
struct LogState {
    events: Vec<Event>,
    sealed_at: Option<DateTime<Utc>>,
}

/// Events recorded during one session.
///
/// The lock is held only for the timestamp and the push, and is never
/// touched by the sampler.
#[derive(Debug)]
pub struct EventLog {
    clock: SessionClock,
    state: Mutex<LogState>,
}

impl EventLog {
    pub fn new(clock: SessionClock) -> Self {
        Self {
            clock,
            state: Mutex::new(LogState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // A panic while holding the lock cannot leave a half-pushed event
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event stamped with the current session time
    pub fn record(&self, label: &str, metadata: Metadata) -> Result<Event> {
        if label.trim().is_empty() {
            return Err(MonitorError::EmptyLabel);
        }
        if let Some(key) = non_finite_key(&metadata) {
            return Err(MonitorError::NonFiniteMetadata { key: key.to_string() });
        }

        let mut state = self.lock();
        if state.sealed_at.is_some() {
            return Err(MonitorError::SessionClosed);
        }

        // Taken under the lock so emission order and timestamp order agree
        let timestamp = self.clock.now();
        let event = Event {
            timestamp,
            label: label.to_string(),
            metadata,
        };
        state.events.push(event.clone());
        debug!(label, "Recorded event");
        Ok(event)
    }

    /// Close the log and return its end time and events.
    ///
    /// Sealing twice returns the same end time.
    pub fn seal(&self) -> (DateTime<Utc>, Vec<Event>) {
        let mut state = self.lock();
        let end = match state.sealed_at {
            Some(end) => end,
            None => {
                let end = self.clock.now();
                state.sealed_at = Some(end);
                end
            }
        };
        (end, state.events.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed_at.is_some()
    }
}

fn non_finite_key(metadata: &Metadata) -> Option<&str> {
    metadata.iter().find_map(|(key, value)| match value {
        MetadataValue::Float(v) if !v.is_finite() => Some(key.as_str()),
        _ => None,
    })
}

/// Cloneable handle for recording events from any thread or task
#[derive(Debug, Clone)]
pub struct EventRecorder {
    log: Arc<EventLog>,
}

impl EventRecorder {
    pub(crate) fn new(log: Arc<EventLog>) -> Self {
        Self { log }
    }

    /// Record a milestone with no metadata
    pub fn record_event(&self, label: impl AsRef<str>) -> Result<Event> {
        self.log.record(label.as_ref(), Metadata::new())
    }

    /// Record a milestone with metadata
    pub fn record_event_with(&self, label: impl AsRef<str>, metadata: Metadata) -> Result<Event> {
        self.log.record(label.as_ref(), metadata)
    }

    /// Run `operation` between `<name>_start` and `<name>_end` events.
    ///
    /// The end event carries `duration_ms`. If the session closes while the
    /// operation runs, the output is still returned and the missing end
    /// event is logged.
    pub fn time_operation<T>(&self, name: &str, operation: impl FnOnce() -> T) -> Result<(T, Duration)> {
        self.record_event(format!("{}{}", name, START_SUFFIX))?;
        let started = Instant::now();
        let output = operation();
        let elapsed = started.elapsed();
        self.finish_operation(name, elapsed);
        Ok((output, elapsed))
    }

    /// Async variant of [`EventRecorder::time_operation`]
    pub async fn time_async<F, T>(&self, name: &str, operation: F) -> Result<(T, Duration)>
    where
        F: Future<Output = T>,
    {
        self.record_event(format!("{}{}", name, START_SUFFIX))?;
        let started = Instant::now();
        let output = operation.await;
        let elapsed = started.elapsed();
        self.finish_operation(name, elapsed);
        Ok((output, elapsed))
    }

    fn finish_operation(&self, name: &str, elapsed: Duration) {
        let mut metadata = Metadata::new();
        metadata.insert(
            "duration_ms".to_string(),
            MetadataValue::Float(elapsed.as_secs_f64() * 1_000.0),
        );
        if let Err(e) = self.record_event_with(format!("{}{}", name, END_SUFFIX), metadata) {
            warn!("Operation '{}' finished in {:.2?} but its end event was not recorded: {}", name, elapsed, e);
        }
    }
}
