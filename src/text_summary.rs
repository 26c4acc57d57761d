//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines for text mode, both the per-result lines
//! streamed while a run is in progress and the ranked summary printed at the end.

use crate::model::{MetricUnit, ProbeResult, RunPhase, ViewSnapshot};
use crate::orchestrator::rank_results;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// `500ms` below one second, `1.5s` above.
pub(crate) fn format_response_time(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{}ms", ms.round())
    } else {
        format!("{:.1}s", ms / 1000.0)
    }
}

/// Format a bytes-per-second figure in decimal megabytes, dropping to KB/s for slow links.
pub(crate) fn format_speed(bytes_per_sec: f64) -> String {
    let mb = bytes_per_sec / 1_000_000.0;
    if mb == 0.0 {
        "0 KB/s".to_string()
    } else if mb < 0.001 {
        "< 1 KB/s".to_string()
    } else if mb < 1.0 {
        let kb = (mb * 1024.0 * 100.0).round() / 100.0;
        format!("{kb} KB/s")
    } else {
        format!("{mb:.2} MB/s")
    }
}

fn format_metric(unit: MetricUnit, metric: Option<f64>) -> String {
    match (unit, metric) {
        (_, None) => "-".to_string(),
        (MetricUnit::Milliseconds, Some(ms)) => format_response_time(ms),
        (MetricUnit::BytesPerSecond, Some(bps)) => format_speed(bps),
    }
}

/// One line per result: status, source, metric, and the error if there is one.
pub(crate) fn format_result_line(unit: MetricUnit, result: &ProbeResult, best: bool) -> String {
    let mark = if best { '*' } else { ' ' };
    let status = if result.success { "ok  " } else { "fail" };
    let mut line = format!(
        "{mark} {status} {:<28} {}",
        result.source_id,
        format_metric(unit, result.metric)
    );
    if let Some(err) = result.error_message.as_deref().filter(|e| !e.is_empty()) {
        line.push_str(&format!("  ({err})"));
    }
    line
}

/// Build the end-of-run summary from the final projection of a view.
pub(crate) fn build_text_summary(snapshot: &ViewSnapshot) -> TextSummary {
    let unit = snapshot.kind.metric_unit();
    let mut lines = Vec::new();

    let target = snapshot.target.as_deref().unwrap_or("-");
    lines.push(format!(
        "{} test for {} {target}: {}",
        snapshot.kind,
        snapshot.kind.target_label(),
        phase_label(snapshot.phase)
    ));
    lines.push(format!(
        "Received {}/{} ({} ok, {} failed)",
        snapshot.received_count,
        snapshot.expected_count,
        snapshot.accepted.len(),
        snapshot.rejected.len()
    ));

    if !snapshot.accepted.is_empty() {
        lines.push("Reachable:".to_string());
        // Ranking is stable, so the first entry is the first-arrived maximum.
        let has_best = snapshot.best_result.is_some();
        for (i, r) in rank_results(snapshot.kind, &snapshot.accepted).iter().enumerate() {
            lines.push(format_result_line(unit, r, has_best && i == 0));
        }
    }
    if !snapshot.rejected.is_empty() {
        lines.push("Unreachable:".to_string());
        for r in &snapshot.rejected {
            lines.push(format_result_line(unit, r, false));
        }
    }
    if let Some(best) = snapshot.best_result.as_ref() {
        lines.push(format!(
            "Best: {} at {}",
            best.source_id,
            format_metric(unit, best.metric)
        ));
    }

    TextSummary { lines }
}

fn phase_label(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Idle => "not started",
        RunPhase::Validating => "validating",
        RunPhase::Starting => "starting",
        RunPhase::Running => "running",
        RunPhase::Completed => "completed",
        RunPhase::Cancelled => "cancelled",
        RunPhase::Failed => "failed to start",
        RunPhase::TimedOut => "timed out",
    }
}
