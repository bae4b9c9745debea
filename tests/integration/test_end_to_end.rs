use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use perfmon::monitoring::Monitor;
use perfmon::report::{HTML_FILE, INTERVAL_CHART, RESOURCE_CHART, SUMMARY_FILE};
use perfmon::{generate_report, Session};

use crate::mocks::ScriptedSource;
use crate::utils::{assert_session_invariants, dir_listing};

/// Monitor a half-second "load", then persist and report on it
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitored_load_produces_report() -> Result<()> {
    crate::test_setup!();
    let temp = TempDir::new()?;

    let monitor = Monitor::start(0.1, Box::new(ScriptedSource::steady(35.0, 128 << 20)))?;
    monitor.record_event("load_start")?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    monitor.record_event("load_end")?;
    let session = monitor.stop().await?;

    assert!(
        (4..=6).contains(&session.samples.len()),
        "expected 4..=6 samples, got {}",
        session.samples.len()
    );
    assert_eq!(session.events.len(), 2);
    assert_session_invariants(&session);

    let snapshot = temp.path().join("perf").join("snapshot.json");
    session.save_snapshot(&snapshot)?;
    assert_eq!(Session::load_snapshot(&snapshot)?, session);

    let out = temp.path().join("report");
    let generated = generate_report(&session, &out)?;

    let load = generated.report.interval("load").expect("load interval");
    assert!(
        (load.duration_secs - 0.5).abs() <= 0.05,
        "load took {:.3}s",
        load.duration_secs
    );
    assert_eq!(
        dir_listing(&out),
        vec![INTERVAL_CHART, HTML_FILE, RESOURCE_CHART, SUMMARY_FILE]
    );

    let html = std::fs::read_to_string(out.join(HTML_FILE))?;
    assert!(html.contains("load_start"));
    assert!(html.contains(RESOURCE_CHART));
    Ok(())
}

/// Events recorded from worker threads and tasks land in one ordered log
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_events_from_many_tasks() -> Result<()> {
    crate::test_setup!();
    let monitor = Monitor::start(0.05, Box::new(ScriptedSource::steady(5.0, 1 << 20)))?;

    let mut handles = Vec::new();
    for worker in 0..4 {
        let recorder = monitor.recorder();
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                recorder.record_event(format!("worker_{}_step_{}", worker, i))?;
                tokio::task::yield_now().await;
            }
            Ok::<(), perfmon::MonitorError>(())
        }));
    }
    let recorder = monitor.recorder();
    let thread = std::thread::spawn(move || {
        recorder.time_operation("thread_work", || std::thread::sleep(Duration::from_millis(20)))
    });

    for handle in handles {
        handle.await??;
    }
    thread.join().expect("worker thread panicked")?;

    let session = monitor.stop().await?;
    assert_eq!(session.events.len(), 102);
    assert_session_invariants(&session);
    Ok(())
}

/// The synthetic workload drives a full monitor session
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_workload_under_monitor() -> Result<()> {
    crate::test_setup!();
    let temp = TempDir::new()?;
    let config = perfmon::config::WorkloadConfig {
        rows: 20_000,
        chunk_size: 5_000,
        cities: 50,
        scratch_dir: Some(temp.path().join("scratch")),
    };

    let monitor = Monitor::start(0.02, Box::new(ScriptedSource::steady(80.0, 64 << 20)))?;
    let summary = perfmon::workload::run(&config, &monitor).await?;
    let session = monitor.stop().await?;

    assert_eq!(summary.chunks, 4);
    assert_session_invariants(&session);

    let generated = generate_report(&session, temp.path().join("report"))?;
    let report = &generated.report;
    assert_eq!(report.operation("generate_chunk_0").map(|o| o.count), Some(1));
    assert!(report.operation("query_count").is_some());
    assert!(report.markers.iter().all(|m| !m.unmatched));
    Ok(())
}
