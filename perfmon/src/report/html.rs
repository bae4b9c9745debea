//! HTML summary page

use std::collections::HashSet;

use handlebars::Handlebars;
use serde::Serialize;

use super::analysis::{MetricSeries, Report};
use crate::error::{ReportError, ReportResult};

const TEMPLATE_NAME: &str = "report";
const TEMPLATE: &str = include_str!("../../templates/report.html.hbs");

#[derive(Serialize)]
struct Row {
    label: &'static str,
    value: String,
}

#[derive(Serialize)]
struct MetricRow {
    name: String,
    unit: String,
    count: usize,
    min: String,
    mean: String,
    p95: String,
    max: String,
}

#[derive(Serialize)]
struct OperationRow {
    name: String,
    count: usize,
    total: String,
    mean: String,
    min: String,
    max: String,
}

#[derive(Serialize)]
struct IntervalRow {
    name: String,
    start: String,
    end: String,
    duration: String,
}

#[derive(Serialize)]
struct TimelineRow {
    offset: String,
    label: String,
    details: String,
    unmatched: bool,
}

#[derive(Serialize)]
struct PageView<'a> {
    title: &'static str,
    generated_at: String,
    summary: Vec<Row>,
    system_info: Vec<Row>,
    resource_chart: &'a str,
    interval_chart: Option<&'a str>,
    metrics: Vec<MetricRow>,
    operations: Vec<OperationRow>,
    intervals: Vec<IntervalRow>,
    timeline: Vec<TimelineRow>,
}

/// Human-readable byte count
pub(crate) fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

fn metric_row(series: &MetricSeries) -> MetricRow {
    let fmt = |v: f64| match series.unit.as_str() {
        "bytes" => format_bytes(v),
        "bytes/s" => format!("{}/s", format_bytes(v)),
        _ => format!("{:.2}", v),
    };
    let dash = || "-".to_string();

    match &series.summary {
        Some(s) => MetricRow {
            name: series.name.clone(),
            unit: series.unit.clone(),
            count: s.count,
            min: fmt(s.min),
            mean: fmt(s.mean),
            p95: fmt(s.p95),
            max: fmt(s.max),
        },
        None => MetricRow {
            name: series.name.clone(),
            unit: series.unit.clone(),
            count: 0,
            min: dash(),
            mean: dash(),
            p95: dash(),
            max: dash(),
        },
    }
}

fn build_view<'a>(report: &Report, resource_chart: &'a str, interval_chart: Option<&'a str>) -> PageView<'a> {
    let summary = vec![
        Row { label: "Start", value: report.start_time.to_rfc3339() },
        Row { label: "End", value: report.end_time.to_rfc3339() },
        Row { label: "Duration", value: format!("{:.2} s", report.duration_secs) },
        Row { label: "Samples", value: report.sample_count.to_string() },
        Row { label: "Unavailable samples", value: report.unavailable_samples.to_string() },
        Row { label: "Events", value: report.timeline.len().to_string() },
        Row { label: "Disk read", value: format_bytes(report.disk_totals.read_bytes as f64) },
        Row { label: "Disk written", value: format_bytes(report.disk_totals.write_bytes as f64) },
    ];

    let system_info = report
        .system_info
        .as_ref()
        .map(|info| {
            vec![
                Row { label: "Hostname", value: info.hostname.clone() },
                Row { label: "Operating system", value: info.os.clone() },
                Row { label: "Kernel", value: info.kernel_version.clone() },
                Row { label: "CPU cores", value: info.cpu_count.to_string() },
                Row { label: "Total memory", value: format_bytes(info.total_memory_bytes as f64) },
                Row { label: "Sample scope", value: info.sample_scope.to_string() },
            ]
        })
        .unwrap_or_default();

    let unmatched_events: HashSet<usize> = report
        .markers
        .iter()
        .filter(|m| m.unmatched)
        .map(|m| m.event)
        .collect();

    PageView {
        title: "Performance Report",
        generated_at: report.generated_at.to_rfc3339(),
        summary,
        system_info,
        resource_chart,
        interval_chart,
        metrics: report.metrics.iter().map(metric_row).collect(),
        operations: report
            .operations
            .iter()
            .map(|op| OperationRow {
                name: op.name.clone(),
                count: op.count,
                total: format!("{:.3}", op.total_secs),
                mean: format!("{:.2}", op.mean_ms),
                min: format!("{:.2}", op.min_ms),
                max: format!("{:.2}", op.max_ms),
            })
            .collect(),
        intervals: report
            .intervals
            .iter()
            .map(|i| IntervalRow {
                name: i.name.clone(),
                start: format!("{:.3}", i.start_offset_secs),
                end: format!("{:.3}", i.end_offset_secs),
                duration: format!("{:.3}", i.duration_secs),
            })
            .collect(),
        timeline: report
            .timeline
            .iter()
            .enumerate()
            .map(|(index, entry)| TimelineRow {
                offset: format!("{:.3}", entry.offset_secs),
                label: entry.label.clone(),
                details: entry.metadata.clone(),
                unmatched: unmatched_events.contains(&index),
            })
            .collect(),
    }
}

/// Render the page. Chart paths are relative to the report directory.
pub(crate) fn render_html(
    report: &Report,
    resource_chart: &str,
    interval_chart: Option<&str>,
    artifact: &str,
) -> ReportResult<String> {
    let mut handlebars = Handlebars::new();
    handlebars
        .register_template_string(TEMPLATE_NAME, TEMPLATE)
        .map_err(|e| ReportError::render(artifact, e))?;

    let view = build_view(report, resource_chart, interval_chart);
    handlebars
        .render(TEMPLATE_NAME, &view)
        .map_err(|e| ReportError::render(artifact, e))
}
