//! SVG charts for the report directory

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

use super::analysis::{
    MetricSeries, Report, TimelineEntry, CPU_METRIC, DISK_READ_METRIC, DISK_WRITE_METRIC,
    MEMORY_METRIC,
};
use crate::error::{ReportError, ReportResult};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const MIN_AXIS_SECS: f64 = 1e-3;

const CPU_COLOR: RGBColor = RGBColor(31, 119, 180);
const MEMORY_COLOR: RGBColor = RGBColor(44, 160, 44);
const READ_COLOR: RGBColor = RGBColor(255, 127, 14);
const WRITE_COLOR: RGBColor = RGBColor(148, 103, 189);
const MARKER_COLOR: RGBColor = RED;
const BAR_COLOR: RGBColor = RGBColor(70, 130, 180);

struct Line {
    label: &'static str,
    color: RGBColor,
    points: Vec<(f64, f64)>,
}

struct Panel {
    title: &'static str,
    unit: &'static str,
    lines: Vec<Line>,
}

fn line(report: &Report, metric: &str, label: &'static str, color: RGBColor, scale: f64) -> Line {
    let points = report
        .metric(metric)
        .map(|series: &MetricSeries| series.points.iter().map(|&(t, v)| (t, v / scale)).collect())
        .unwrap_or_default();
    Line { label, color, points }
}

/// CPU, memory and disk panels stacked over a shared time axis
pub(crate) fn render_resource_chart(report: &Report, path: &Path, artifact: &str) -> ReportResult<()> {
    let panels = [
        Panel {
            title: "CPU Usage",
            unit: "CPU (%)",
            lines: vec![line(report, CPU_METRIC, "cpu", CPU_COLOR, 1.0)],
        },
        Panel {
            title: "Memory Usage",
            unit: "Memory (MiB)",
            lines: vec![line(report, MEMORY_METRIC, "rss", MEMORY_COLOR, BYTES_PER_MIB)],
        },
        Panel {
            title: "Disk I/O",
            unit: "Disk (MiB/s)",
            lines: vec![
                line(report, DISK_READ_METRIC, "read", READ_COLOR, BYTES_PER_MIB),
                line(report, DISK_WRITE_METRIC, "write", WRITE_COLOR, BYTES_PER_MIB),
            ],
        },
    ];
    let x_max = report.duration_secs.max(MIN_AXIS_SECS);

    let root = SVGBackend::new(path, (1200, 900)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| ReportError::render(artifact, e))?;

    for (area, panel) in root.split_evenly((3, 1)).iter().zip(panels.iter()) {
        draw_panel(area, panel, x_max, &report.timeline).map_err(|e| ReportError::render(artifact, e))?;
    }

    root.present().map_err(|e| ReportError::render(artifact, e))?;
    Ok(())
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: &Panel,
    x_max: f64,
    timeline: &[TimelineEntry],
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let peak = panel
        .lines
        .iter()
        .flat_map(|l| l.points.iter().map(|p| p.1))
        .fold(0.0f64, f64::max);
    let y_max = if peak > 0.0 { peak * 1.15 } else { 1.0 };

    let mut chart = ChartBuilder::on(area)
        .caption(panel.title, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..x_max, 0f64..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc(panel.unit)
        .draw()?;

    for line in &panel.lines {
        let color = line.color;
        chart
            .draw_series(LineSeries::new(line.points.iter().copied(), color.stroke_width(2)))?
            .label(line.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    for (i, entry) in timeline.iter().enumerate() {
        let x = entry.offset_secs;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(x, 0.0), (x, y_max)],
            MARKER_COLOR.mix(0.4).stroke_width(1),
        )))?;
        // stagger labels so neighbouring markers stay readable
        let y = y_max * (0.95 - 0.1 * (i % 3) as f64);
        chart.draw_series(std::iter::once(Text::new(
            entry.label.clone(),
            (x, y),
            ("sans-serif", 11).into_font().color(&MARKER_COLOR),
        )))?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    Ok(())
}

/// Mean duration per operation as a bar chart
pub(crate) fn render_interval_chart(report: &Report, path: &Path, artifact: &str) -> ReportResult<()> {
    let root = SVGBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| ReportError::render(artifact, e))?;
    draw_bars(&root, report).map_err(|e| ReportError::render(artifact, e))?;
    root.present().map_err(|e| ReportError::render(artifact, e))?;
    Ok(())
}

fn draw_bars<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    report: &Report,
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let operations = &report.operations;
    let bars: Vec<(String, f64)> = operations
        .iter()
        .map(|op| (op.name.clone(), op.mean_ms / 1_000.0))
        .collect();
    let count = bars.len().max(1) as u32;
    let peak = bars.iter().map(|b| b.1).fold(0.0f64, f64::max);
    let y_max = if peak > 0.0 { peak * 1.2 } else { 1.0 };

    let mut chart = ChartBuilder::on(area)
        .caption("Operation Durations (mean)", ("sans-serif", 20))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d((0u32..count).into_segmented(), 0f64..y_max)?;

    let name_of = |value: &SegmentValue<u32>| match value {
        SegmentValue::CenterOf(i) => bars.get(*i as usize).map(|b| b.0.clone()).unwrap_or_default(),
        _ => String::new(),
    };
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len())
        .x_label_formatter(&name_of)
        .y_desc("Duration (s)")
        .draw()?;

    chart.draw_series(bars.iter().enumerate().map(|(i, (_, secs))| {
        let i = i as u32;
        Rectangle::new(
            [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), *secs)],
            BAR_COLOR.filled(),
        )
    }))?;

    chart.draw_series(bars.iter().enumerate().map(|(i, (_, secs))| {
        Text::new(
            format!("{:.3}s", secs),
            (SegmentValue::CenterOf(i as u32), *secs),
            ("sans-serif", 12),
        )
    }))?;

    Ok(())
}
