//! Summary statistics over latency samples

use common::PhaseStats;

/// Summarizes latencies in milliseconds; `None` for an empty sequence
///
/// Mean and standard deviation use the population formulas. The median of
/// an even-length sequence is the average of the two middle elements.
pub fn summarize(latencies_ms: &[f64]) -> Option<PhaseStats> {
    let first = *latencies_ms.first()?;
    let count = latencies_ms.len();
    let n = count as f64;

    let mut sorted = latencies_ms.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    let mid = count / 2;
    let median = if count % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    Some(PhaseStats {
        min_ms: sorted[0],
        max_ms: sorted[count - 1],
        mean_ms: mean,
        median_ms: median,
        std_dev_ms: if count > 1 { variance.sqrt() } else { 0.0 },
        first_ms: first,
        count,
    })
}
