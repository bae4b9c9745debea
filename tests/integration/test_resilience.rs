use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;

use perfmon::config::MonitorConfig;
use perfmon::monitoring::Monitor;
use perfmon::report::{Report, CPU_METRIC};
use perfmon::{ConfigError, MonitorError};

use crate::mocks::{ScriptedSource, Step};
use crate::utils::assert_session_invariants;

/// A failing tick yields a sentinel and sampling carries on
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_source_failure_yields_sentinel() -> Result<()> {
    crate::test_setup!();
    let source = ScriptedSource::failing_on(&[3], 10);
    let reads = source.read_counter();

    let monitor = Monitor::start(0.03, Box::new(source))?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let session = monitor.stop().await?;

    assert!(session.samples.len() >= 5, "got {} samples", session.samples.len());
    assert_eq!(session.samples.len(), reads.load(Ordering::SeqCst));
    assert!(!session.samples[1].is_sentinel());
    assert!(session.samples[2].is_sentinel());
    assert_eq!(session.samples[2].cpu_percent, 0.0);
    assert!(!session.samples[3].is_sentinel());
    assert_session_invariants(&session);

    let report = Report::from_session(&session)?;
    assert_eq!(report.unavailable_samples, 1);
    let cpu = report.metric(CPU_METRIC).and_then(|m| m.summary.clone()).expect("cpu summary");
    assert_eq!(cpu.count, session.samples.len() - 1);
    Ok(())
}

/// A panicking source is contained the same way as a failing one
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_source_panic_is_contained() -> Result<()> {
    let source = ScriptedSource::new(vec![Step::Panic, Step::Fail("still warming up".to_string())]);
    let monitor = Monitor::start(0.02, Box::new(source))?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let session = monitor.stop().await?;

    assert!(session.samples[0].is_sentinel());
    assert!(session.samples[1].is_sentinel());
    assert!(session.samples.iter().skip(2).all(|s| !s.is_sentinel()));
    Ok(())
}

#[tokio::test]
async fn test_invalid_intervals_rejected() {
    for interval in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let result = Monitor::start(interval, Box::new(ScriptedSource::steady(1.0, 1)));
        assert!(
            matches!(result, Err(MonitorError::Config(ConfigError::InvalidInterval { .. }))),
            "interval {} was accepted",
            interval
        );
    }

    let mut config = MonitorConfig::default();
    config.sampling.interval_secs = 0.0;
    assert!(Monitor::start_with_config(&config).is_err());
}

#[test]
fn test_start_requires_runtime() {
    let result = Monitor::start(0.1, Box::new(ScriptedSource::steady(1.0, 1)));
    assert!(matches!(result, Err(MonitorError::Config(ConfigError::NoRuntime))));
}

/// A second stop returns the same session and samples nothing new
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_double_stop() -> Result<()> {
    let source = ScriptedSource::steady(1.0, 1);
    let reads = source.read_counter();
    let monitor = Monitor::start(0.02, Box::new(source))?;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let first = monitor.stop().await?;
    let reads_after_stop = reads.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    let second = monitor.stop().await?;

    assert_eq!(first, second);
    assert_eq!(reads.load(Ordering::SeqCst), reads_after_stop);
    assert_eq!(monitor.sample_count() as usize, first.samples.len());
    assert!(matches!(monitor.record_event("after_stop"), Err(MonitorError::SessionClosed)));
    Ok(())
}

/// Stopping right after start still yields a valid, reportable session
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_immediate_stop() -> Result<()> {
    let monitor = Monitor::start(5.0, Box::new(ScriptedSource::steady(1.0, 1)))?;
    let session = monitor.stop().await?;

    assert!(session.samples.len() <= 1);
    assert!(session.events.is_empty());
    assert_session_invariants(&session);
    assert!(Report::from_session(&session).is_ok());
    Ok(())
}

/// Dropping a monitor without stopping it ends sampling
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_monitor_stops_sampling() -> Result<()> {
    let source = ScriptedSource::steady(1.0, 1);
    let reads = source.read_counter();
    let monitor = Monitor::start(0.01, Box::new(source))?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(monitor);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let settled = reads.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(reads.load(Ordering::SeqCst), settled);
    Ok(())
}
