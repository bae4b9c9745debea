//! Report generation
//!
//! A report directory holds:
//!
//! - `resource_usage.svg`: CPU, memory and disk panels with event markers
//! - `intervals.svg`: mean duration per paired operation (only when at
//!   least one start/end pair exists)
//! - `summary.json`: the computed [`Report`]
//! - `report.html`: summary page linking the charts
//!
//! Output is all-or-nothing. The session is validated before anything
//! touches the filesystem, and artifacts are rendered into a staging
//! directory beside `output_dir` that is moved into place only once every
//! artifact has been written.

pub mod analysis;
mod charts;
mod html;

pub use analysis::{
    DiskTotals, Interval, Marker, MetricSeries, MetricSummary, OperationSummary, Report,
    TimelineEntry, CPU_METRIC, DISK_READ_METRIC, DISK_WRITE_METRIC, MEMORY_METRIC,
};

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ReportError, ReportResult};
use crate::session::Session;

pub const RESOURCE_CHART: &str = "resource_usage.svg";
pub const INTERVAL_CHART: &str = "intervals.svg";
pub const SUMMARY_FILE: &str = "summary.json";
pub const HTML_FILE: &str = "report.html";

/// A report that has been written to disk
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub directory: PathBuf,
    pub artifacts: Vec<PathBuf>,
    pub report: Report,
}

impl GeneratedReport {
    pub fn html_path(&self) -> PathBuf {
        self.directory.join(HTML_FILE)
    }
}

/// Analyze `session` and write the report directory
pub fn generate_report<P: AsRef<Path>>(session: &Session, output_dir: P) -> ReportResult<GeneratedReport> {
    let output_dir = output_dir.as_ref();
    let report = Report::from_session(session)?;
    info!(
        "Generating report for {} samples and {} events into {}",
        report.sample_count,
        report.timeline.len(),
        output_dir.display()
    );

    let parent = match output_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".perfmon-report-")
        .tempdir_in(&parent)?;
    let names = write_artifacts(&report, staging.path())?;
    publish(staging.path(), output_dir, &names)?;

    info!("Report written to {}", output_dir.display());
    Ok(GeneratedReport {
        directory: output_dir.to_path_buf(),
        artifacts: names.iter().map(|name| output_dir.join(name)).collect(),
        report,
    })
}

/// Load a snapshot, then behave like [`generate_report`]
pub fn generate_report_from_snapshot<P: AsRef<Path>, Q: AsRef<Path>>(
    snapshot: P,
    output_dir: Q,
) -> ReportResult<GeneratedReport> {
    let session = Session::load_snapshot(snapshot)?;
    generate_report(&session, output_dir)
}

fn write_artifacts(report: &Report, dir: &Path) -> ReportResult<Vec<&'static str>> {
    let mut names = Vec::with_capacity(4);

    charts::render_resource_chart(report, &dir.join(RESOURCE_CHART), RESOURCE_CHART)?;
    names.push(RESOURCE_CHART);

    let interval_chart = if report.operations.is_empty() {
        debug!("No paired intervals; skipping {}", INTERVAL_CHART);
        None
    } else {
        charts::render_interval_chart(report, &dir.join(INTERVAL_CHART), INTERVAL_CHART)?;
        names.push(INTERVAL_CHART);
        Some(INTERVAL_CHART)
    };

    let summary = serde_json::to_string_pretty(report).map_err(|e| ReportError::render(SUMMARY_FILE, e))?;
    fs::write(dir.join(SUMMARY_FILE), summary)?;
    names.push(SUMMARY_FILE);

    let page = html::render_html(report, RESOURCE_CHART, interval_chart, HTML_FILE)?;
    fs::write(dir.join(HTML_FILE), page)?;
    names.push(HTML_FILE);

    Ok(names)
}

/// Move staged artifacts into `output_dir`, renaming the whole staging
/// directory when the target does not exist yet.
fn publish(staging: &Path, output_dir: &Path, names: &[&str]) -> ReportResult<()> {
    if !output_dir.exists() {
        fs::rename(staging, output_dir)?;
        return Ok(());
    }

    if !output_dir.is_dir() {
        return Err(ReportError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a directory", output_dir.display()),
        )));
    }

    for name in names {
        fs::rename(staging.join(name), output_dir.join(name))?;
    }

    // Artifacts from an earlier run that this one did not produce
    for stale in [RESOURCE_CHART, INTERVAL_CHART, SUMMARY_FILE, HTML_FILE] {
        if names.contains(&stale) {
            continue;
        }
        match fs::remove_file(output_dir.join(stale)) {
            Ok(()) => debug!("Removed stale {}", stale),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
