use std::fs;
use std::path::Path;

use perfmon::Session;

/// Assert ordering and bounds for every sample and event
pub fn assert_session_invariants(session: &Session) {
    let end = session.end_time.expect("session should be sealed");
    assert!(session.start_time <= end, "end_time precedes start_time");

    for (i, sample) in session.samples.iter().enumerate() {
        assert!(
            sample.timestamp >= session.start_time && sample.timestamp <= end,
            "samples[{}] outside session bounds",
            i
        );
    }
    for (i, event) in session.events.iter().enumerate() {
        assert!(
            event.timestamp >= session.start_time && event.timestamp <= end,
            "events[{}] outside session bounds",
            i
        );
    }

    assert!(session.samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(session.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(session.validate().is_ok());
}

/// Sorted file names in `dir`
pub fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
