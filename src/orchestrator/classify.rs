//! Maps one raw engine payload into a `ProbeResult` with normalized units.

use crate::model::{ProbeKind, ProbeResult, RawOutcome, ThroughputOutcome};

/// Classify `raw` as a result of `kind`. Returns `None` when the payload shape belongs to
/// another kind.
///
/// Resolver metrics are response times in milliseconds. Throughput metrics are bytes per
/// second; failed throughput entries keep a metric of 0 so they still count toward progress.
pub fn classify(raw: &RawOutcome, kind: ProbeKind) -> Option<ProbeResult> {
    if raw.shape_kind() != kind {
        return None;
    }
    let result = match raw {
        RawOutcome::Resolver {
            dns_server,
            status,
            response_time,
            error_message,
            session_id,
        } => ProbeResult {
            source_id: dns_server.clone(),
            success: *status,
            metric: if *status {
                response_time.map(|ms| ms as f64)
            } else {
                None
            },
            error_message: error_message.clone(),
            session_id: *session_id,
        },
        RawOutcome::Download(o) | RawOutcome::Registry { outcome: o, .. } => throughput(o),
    };
    Some(result)
}

fn throughput(o: &ThroughputOutcome) -> ProbeResult {
    let metric = if o.success {
        mbps_to_bytes_per_sec(o.download_speed_mbps)
    } else {
        0.0
    };
    ProbeResult {
        source_id: o.target.clone(),
        success: o.success,
        metric: Some(metric),
        error_message: o.error_message.clone(),
        session_id: o.session_id,
    }
}

/// Megabits per second to bytes per second, with garbage clamped to 0.
pub fn mbps_to_bytes_per_sec(mbps: f64) -> f64 {
    if !mbps.is_finite() || mbps <= 0.0 {
        return 0.0;
    }
    (mbps * 1_000_000.0 / 8.0).round()
}
