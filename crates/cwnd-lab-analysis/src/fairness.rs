use cwnd_lab_abstract::{FairnessResult, FlowSeries};
use tracing::debug;

/// Jain's fairness index `(Σx)² / (n·Σx²)`.
///
/// Returns 0 for an empty input or when any mean is not positive, so a
/// starved flow always reads as unfair.
pub fn jain_index(means: &[f64]) -> f64 {
    if means.is_empty() || means.iter().any(|m| m.is_nan() || *m <= 0.0) {
        return 0.0;
    }
    let sum: f64 = means.iter().sum();
    let sum_sq: f64 = means.iter().map(|m| m * m).sum();
    (sum * sum) / (means.len() as f64 * sum_sq)
}

/// Score a set of flows. Flows keep their own ids in `per_flow_mean`; the
/// index is computed over every series given, even if two share an id.
pub fn score(flows: &[FlowSeries]) -> FairnessResult {
    let means: Vec<f64> = flows.iter().map(FlowSeries::mean_mbps).collect();
    let per_flow_mean = flows
        .iter()
        .zip(&means)
        .map(|(flow, mean)| (flow.flow.clone(), *mean))
        .collect();
    let aggregate = means.iter().sum();
    let fairness_index = jain_index(&means);
    debug!("means {means:?} -> aggregate {aggregate:.2}, index {fairness_index:.4}");

    FairnessResult {
        per_flow_mean,
        aggregate,
        fairness_index,
    }
}
