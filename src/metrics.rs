use crate::model::{MetricSummary, MetricUnit};

/// Compute metrics (mean, median, 25th percentile, 75th percentile) from samples.
pub fn compute_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.len() < 2 {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

/// Summarize the metrics of accepted results; `None` with fewer than two samples.
pub fn summarize(samples: &[f64], unit: MetricUnit) -> Option<MetricSummary> {
    compute_metrics(samples).map(|(mean, median, p25, p75)| MetricSummary {
        unit,
        mean,
        median,
        p25,
        p75,
    })
}
