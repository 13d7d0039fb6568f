//! Plain-text rendering of summaries and labeled errors.

use usagelens_engine::{EngineError, ResultSummary, SeriesPoint, SummaryStatus, format_number};

/// Render a summary the way a calling model reads it best: headline first,
/// then the series, peaks and notes.
pub fn render_summary(summary: &ResultSummary) -> String {
    let mut lines = Vec::new();

    match summary.status {
        SummaryStatus::Complete => lines.push(format!(
            "{}: {} {} ({} row(s))",
            summary.tool,
            format_number(summary.primary_metric_count),
            summary.primary_metric_name,
            format_number(summary.total_rows as f64),
        )),
        SummaryStatus::Exhausted => lines.push(format!("{}: no data found", summary.tool)),
    }
    if let Some(by) = &summary.answered_by {
        lines.push(format!(
            "Answered by {by} (fallback level {}).",
            summary.source_strategy_level
        ));
    }

    if !summary.grouped_series.is_empty() {
        lines.push(String::new());
        lines.push("Results:".into());
        lines.extend(summary.grouped_series.iter().map(render_point));
    }

    if !summary.peaks.is_empty() {
        lines.push(String::new());
        lines.push("Peaks:".into());
        for peak in &summary.peaks {
            lines.push(format!(
                "  {}: {} on {}",
                peak.metric,
                format_number(peak.value),
                peak.key
            ));
        }
    }

    if !summary.narrative_hints.is_empty() {
        lines.push(String::new());
        lines.push("Notes:".into());
        lines.extend(summary.narrative_hints.iter().map(|h| format!("  - {h}")));
    }

    lines.join("\n")
}

fn render_point(point: &SeriesPoint) -> String {
    let mut line = format!("  {}", point.key);
    if !point.metrics.is_empty() {
        let metrics: Vec<String> = point
            .metrics
            .iter()
            .map(|(name, value)| format!("{name}={}", format_number(*value)))
            .collect();
        line.push_str(": ");
        line.push_str(&metrics.join(", "));
    }
    if !point.attributes.is_empty() {
        let attrs: Vec<String> = point
            .attributes
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        line.push_str(" [");
        line.push_str(&attrs.join(", "));
        line.push(']');
    }
    line
}

/// Render a labeled failure: label, message, then what to do about it.
pub fn render_error(err: &EngineError) -> String {
    format!("{}: {err}\n{}", err.label(), err.remediation())
}
