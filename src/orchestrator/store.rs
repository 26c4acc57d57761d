use crate::model::{ProbeKind, ProbeResult};
use std::cmp::Ordering;

/// Display-ready partitions for one session. Replaced wholesale when a new run starts.
#[derive(Debug, Clone)]
pub struct AggregationStore {
    kind: ProbeKind,
    expected_count: usize,
    accepted: Vec<ProbeResult>,
    rejected: Vec<ProbeResult>,
    completed: bool,
}

impl AggregationStore {
    pub fn new(kind: ProbeKind, expected_count: usize) -> Self {
        Self {
            kind,
            expected_count,
            accepted: Vec::new(),
            rejected: Vec::new(),
            completed: false,
        }
    }

    pub fn reset(&mut self, kind: ProbeKind, expected_count: usize) {
        *self = Self::new(kind, expected_count);
    }

    /// Append to the partition matching `result.success`. Overshooting the expected
    /// count is tolerated.
    pub fn accept(&mut self, result: ProbeResult) {
        if result.success {
            self.accepted.push(result);
        } else {
            self.rejected.push(result);
        }
    }

    /// Returns true only on the first call.
    pub fn mark_completed(&mut self) -> bool {
        !std::mem::replace(&mut self.completed, true)
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    pub fn accepted(&self) -> &[ProbeResult] {
        &self.accepted
    }

    pub fn rejected(&self) -> &[ProbeResult] {
        &self.rejected
    }

    pub fn received_count(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// `received / expected`, clamped to [0, 1].
    pub fn progress_ratio(&self) -> f64 {
        if self.expected_count == 0 {
            return if self.received_count() > 0 { 1.0 } else { 0.0 };
        }
        (self.received_count() as f64 / self.expected_count as f64).clamp(0.0, 1.0)
    }

    /// Accepted results, best first. Throughput sorts descending by metric, latency
    /// ascending; the sort is stable so ties keep arrival order.
    pub fn ranked_accepted(&self) -> Vec<ProbeResult> {
        rank_results(self.kind, &self.accepted)
    }

    /// Highest-metric accepted entry, first-arrived on ties. Throughput kinds only.
    pub fn best_result(&self) -> Option<ProbeResult> {
        if !self.kind.is_throughput() {
            return None;
        }
        self.ranked_accepted().into_iter().next()
    }
}

/// Rank results for `kind`, best first. The sort is stable.
pub(crate) fn rank_results(kind: ProbeKind, results: &[ProbeResult]) -> Vec<ProbeResult> {
    let mut ranked = results.to_vec();
    let descending = kind.is_throughput();
    ranked.sort_by(|a, b| cmp_metric(a.metric, b.metric, descending));
    ranked
}

// Missing metrics rank after every present value in either direction.
fn cmp_metric(a: Option<f64>, b: Option<f64>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) if descending => y.total_cmp(&x),
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
