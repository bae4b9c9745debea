//! Background sampling loop
//!
//! The loop owns its sample buffer outright; nothing else touches it until
//! [`Sampler::stop`] hands it back, so ticks never contend with the workload.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, ConfigResult, MetricError, MonitorError, Result};
use crate::monitoring::SampleSource;
use crate::session::{Sample, SessionClock};

/// Validate a sampling interval given in (possibly fractional) seconds
pub fn interval_from_secs(secs: f64) -> ConfigResult<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidInterval { value: secs });
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidInterval { value: secs })
}

/// Handle to a running sampling task. Dropping it without calling
/// [`Sampler::stop`] cancels the loop.
#[derive(Debug)]
pub struct Sampler {
    interval: Duration,
    cancel: CancellationToken,
    _guard: DropGuard,
    collected: Arc<AtomicU64>,
    handle: JoinHandle<Vec<Sample>>,
}

impl Sampler {
    /// Spawn the sampling loop on the current tokio runtime and return at once
    pub fn spawn(
        source: Box<dyn SampleSource>,
        clock: SessionClock,
        interval: Duration,
    ) -> ConfigResult<Self> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval { value: 0.0 });
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let cancel = CancellationToken::new();
        let collected = Arc::new(AtomicU64::new(0));
        let handle = runtime.spawn(sampling_loop(
            source,
            clock,
            interval,
            cancel.clone(),
            collected.clone(),
        ));

        info!("Sampler started with a {:?} interval", interval);
        Ok(Self {
            interval,
            _guard: cancel.clone().drop_guard(),
            cancel,
            collected,
            handle,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Samples taken so far
    pub fn sample_count(&self) -> u64 {
        self.collected.load(Ordering::Relaxed)
    }

    pub(crate) fn counter(&self) -> Arc<AtomicU64> {
        self.collected.clone()
    }

    /// Signal the loop, wait for any in-flight read and return the series
    pub async fn stop(self) -> Result<Vec<Sample>> {
        self.cancel.cancel();
        let samples = self
            .handle
            .await
            .map_err(|e| MonitorError::SamplerFailed(e.to_string()))?;
        info!("Sampler stopped after {} samples", samples.len());
        Ok(samples)
    }
}

async fn sampling_loop(
    source: Box<dyn SampleSource>,
    clock: SessionClock,
    interval: Duration,
    cancel: CancellationToken,
    collected: Arc<AtomicU64>,
) -> Vec<Sample> {
    let mut ticker = time::interval(interval);
    // Late ticks wait for the next grid point instead of bursting
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut samples = Vec::new();
    let mut source = source;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let read = task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| source.read()))
                .unwrap_or_else(|_| {
                    Err(MetricError::Unavailable {
                        metric: "all".to_string(),
                        reason: "metric source panicked".to_string(),
                    })
                });
            (source, result)
        })
        .await;

        let (returned, result) = match read {
            Ok(pair) => pair,
            Err(e) => {
                error!("Sampling task lost its metric source: {}", e);
                break;
            }
        };
        source = returned;

        let timestamp = clock.now();
        let sample = match result {
            Ok(reading) if !reading.cpu_percent.is_finite() => {
                warn!("Recording sentinel sample: cpu reading {} is not finite", reading.cpu_percent);
                Sample::sentinel(timestamp, format!("cpu reading {} is not finite", reading.cpu_percent))
            }
            Ok(reading) => reading.into_sample(timestamp),
            Err(e) => {
                warn!("Recording sentinel sample: {}", e);
                Sample::sentinel(timestamp, e.to_string())
            }
        };
        debug!(
            cpu_percent = sample.cpu_percent,
            memory_bytes = sample.memory_bytes,
            "Captured sample"
        );

        samples.push(sample);
        collected.fetch_add(1, Ordering::Relaxed);
    }

    samples
}
