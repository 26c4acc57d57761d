//! Post-run processing.
//!
//! Turns the final projection of a view into a report for presentation layers.

use super::store::rank_results;
use crate::metrics;
use crate::model::{RunReport, ViewSnapshot};

/// Build a report from a view snapshot. Accepted results come out ranked best first.
pub(crate) fn build_report(snapshot: &ViewSnapshot) -> RunReport {
    let unit = snapshot.kind.metric_unit();
    let accepted = rank_results(snapshot.kind, &snapshot.accepted);
    let samples: Vec<f64> = snapshot.accepted.iter().filter_map(|r| r.metric).collect();

    RunReport {
        kind: snapshot.kind,
        target: snapshot.target.clone().unwrap_or_default(),
        session_id: snapshot.session_id,
        finished_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        phase: snapshot.phase,
        expected_count: snapshot.expected_count,
        received_count: snapshot.received_count,
        accepted,
        rejected: snapshot.rejected.clone(),
        best: snapshot.best_result.clone(),
        metric_summary: metrics::summarize(&samples, unit),
    }
}
