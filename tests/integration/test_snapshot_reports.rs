use std::fs;

use anyhow::Result;
use serde_json::{json, Value};
use tempfile::TempDir;

use perfmon::report::{DISK_READ_METRIC, HTML_FILE, INTERVAL_CHART, RESOURCE_CHART, SUMMARY_FILE};
use perfmon::session::{Metadata, MetadataValue, SNAPSHOT_FORMAT_VERSION};
use perfmon::{generate_report_from_snapshot, ReportError, Session};

use crate::mocks::{realistic_session, SessionBuilder};
use crate::utils::dir_listing;

#[test]
fn test_snapshot_round_trip_with_metadata() -> Result<()> {
    let temp = TempDir::new()?;
    let mut metadata = Metadata::new();
    metadata.insert("rows".to_string(), MetadataValue::Integer(1_000_000_000));
    metadata.insert("ratio".to_string(), MetadataValue::Float(0.25));
    metadata.insert("cached".to_string(), MetadataValue::Bool(false));
    metadata.insert("engine".to_string(), MetadataValue::from("duckdb"));

    let session = SessionBuilder::new()
        .system_info()
        .sample(0, 12.5, 1 << 20, 0, 0)
        .sentinel(100, "process table busy")
        .sample(200, 99.0, 2 << 20, 4096, 512)
        .event_with(150, "load_start", metadata)
        .build();

    let path = temp.path().join("nested").join("snapshot.json");
    session.save_snapshot(&path)?;
    let restored = Session::load_snapshot(&path)?;
    assert_eq!(restored, session);

    let raw: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    assert_eq!(raw["format_version"], json!(SNAPSHOT_FORMAT_VERSION));
    assert_eq!(raw["samples"][1]["unavailable"], json!("process table busy"));
    assert!(raw["samples"][0].get("unavailable").is_none());
    Ok(())
}

#[test]
fn test_report_from_snapshot() -> Result<()> {
    let temp = TempDir::new()?;
    let session = realistic_session(7, 2_000);
    let snapshot = temp.path().join("snapshot.json");
    session.save_snapshot(&snapshot)?;

    let out = temp.path().join("report");
    let generated = generate_report_from_snapshot(&snapshot, &out)?;

    assert_eq!(
        dir_listing(&out),
        vec![INTERVAL_CHART, HTML_FILE, RESOURCE_CHART, SUMMARY_FILE]
    );
    let report = &generated.report;
    assert_eq!(report.sample_count, 20);
    let names: Vec<&str> = report.intervals.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["load", "query_count", "sort"]);
    assert_eq!(report.markers.len(), 1);
    assert_eq!(report.markers[0].label, "checkpoint");

    let read = report.metric(DISK_READ_METRIC).expect("disk read series");
    assert_eq!(read.points.len(), 19);
    assert!(read.points.iter().all(|(_, rate)| *rate >= 0.0));
    Ok(())
}

/// A snapshot missing an event timestamp fails before any output exists
#[test]
fn test_malformed_snapshot_creates_no_output() -> Result<()> {
    let temp = TempDir::new()?;
    let session = realistic_session(3, 1_000);
    let mut raw = serde_json::to_value(&session)?;
    raw["events"][1]
        .as_object_mut()
        .expect("event object")
        .remove("timestamp");

    let snapshot = temp.path().join("broken.json");
    fs::write(&snapshot, serde_json::to_string_pretty(&raw)?)?;

    let out = temp.path().join("report");
    let err = generate_report_from_snapshot(&snapshot, &out).unwrap_err();

    match err {
        ReportError::MalformedSnapshot { record, .. } => assert_eq!(record, "events[1]"),
        other => panic!("unexpected error: {}", other),
    }
    assert!(!out.exists());
    assert_eq!(dir_listing(temp.path()), vec!["broken.json"]);
    Ok(())
}

#[test]
fn test_out_of_bounds_and_reordered_snapshots_rejected() -> Result<()> {
    let temp = TempDir::new()?;

    let late = SessionBuilder::new()
        .sample(0, 1.0, 1, 0, 0)
        .event(500, "late_event")
        .end(100)
        .build();
    let path = temp.path().join("late.json");
    late.save_snapshot(&path)?;
    assert!(matches!(
        Session::load_snapshot(&path),
        Err(ReportError::OutOfBounds { record }) if record == "events[0]"
    ));

    let reordered = SessionBuilder::new()
        .sample(200, 1.0, 1, 0, 0)
        .sample(100, 1.0, 1, 0, 0)
        .build();
    let path = temp.path().join("reordered.json");
    reordered.save_snapshot(&path)?;
    assert!(matches!(
        Session::load_snapshot(&path),
        Err(ReportError::NonMonotonic { record }) if record == "samples[1]"
    ));
    Ok(())
}

#[test]
fn test_missing_snapshot_file() {
    let temp = TempDir::new().unwrap();
    let result = generate_report_from_snapshot(temp.path().join("absent.json"), temp.path().join("report"));
    assert!(result.is_err());
    assert!(!temp.path().join("report").exists());
}

#[test]
fn test_regenerating_into_existing_directory() -> Result<()> {
    let temp = TempDir::new()?;
    let out = temp.path().join("report");
    let snapshot = temp.path().join("snapshot.json");

    realistic_session(1, 1_000).save_snapshot(&snapshot)?;
    generate_report_from_snapshot(&snapshot, &out)?;
    let first = fs::read_to_string(out.join(SUMMARY_FILE))?;

    realistic_session(2, 3_000).save_snapshot(&snapshot)?;
    let second = generate_report_from_snapshot(&snapshot, &out)?;

    assert_ne!(fs::read_to_string(out.join(SUMMARY_FILE))?, first);
    assert_eq!(second.report.sample_count, 30);
    assert_eq!(dir_listing(temp.path()), vec!["report", "snapshot.json"]);
    Ok(())
}

mod properties {
    use super::*;
    use perfmon::report::Report;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_snapshot_round_trip(seed in any::<u64>(), duration_ms in 200i64..5_000) {
            let session = realistic_session(seed, duration_ms);
            let json = serde_json::to_string(&session).unwrap();
            prop_assert_eq!(Session::from_json(&json).unwrap(), session);
        }

        #[test]
        fn prop_report_intervals_within_session(seed in any::<u64>(), duration_ms in 200i64..5_000) {
            let session = realistic_session(seed, duration_ms);
            let report = Report::from_session(&session).unwrap();

            prop_assert_eq!(report.intervals.len(), 3);
            for interval in &report.intervals {
                prop_assert!(interval.start_offset_secs >= 0.0);
                prop_assert!(interval.end_offset_secs <= report.duration_secs + 1e-9);
                prop_assert!(interval.duration_secs >= 0.0);
            }
        }
    }
}
