//! Order-statistics envelopes.
//!
//! Both reductions report bounds relative to the nominal, so the central value
//! is always `1.0`.

use serde::Serialize;

use crate::config::EnvelopeIndices;

/// Lower quantile used for the per-event-ratio band.
pub const LOW_QUANTILE: f64 = 0.16;
/// Upper quantile used for the per-event-ratio band.
pub const HIGH_QUANTILE: f64 = 0.84;

/// Individual curves behind an envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Curves {
    /// Per-replica yield ratios `sum[k] / sum[0]`, in replica order.
    Replicas(Vec<f64>),
    /// Per-event ratios, ascending.
    Events(Vec<f64>),
}

/// Reduced result of one accumulator cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Central value after normalization (always `1.0`).
    pub nominal: f64,
    /// Low bound ratio.
    pub low: f64,
    /// High bound ratio.
    pub high: f64,
    /// Number of events that entered the cell.
    pub n_events: u64,
    /// Individual curves.
    pub curves: Curves,
}

/// Yield-sum reduction over per-replica sums.
///
/// `sums[0]` is the nominal yield; a zero nominal is replaced by `1.0` as the
/// divisor only. Bounds are the raw sums at the fixed `indices` of the
/// ascending order, divided by the nominal.
///
/// Returns `None` when the cell saw no events or `indices` do not fit `sums`.
pub fn yield_sum_envelope(
    sums: &[f64],
    n_events: u64,
    indices: EnvelopeIndices,
) -> Option<Envelope> {
    if n_events == 0 || indices.high >= sums.len() || indices.low > indices.high {
        return None;
    }

    let nominal_sum = if sums[0] == 0.0 { 1.0 } else { sums[0] };
    let replicas: Vec<f64> = sums.iter().map(|s| s / nominal_sum).collect();

    let mut sorted = sums.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(Envelope {
        nominal: 1.0,
        low: sorted[indices.low] / nominal_sum,
        high: sorted[indices.high] / nominal_sum,
        n_events,
        curves: Curves::Replicas(replicas),
    })
}

/// `(floor(n * 0.16), floor(n * 0.84))`, the high index clamped to `n - 1`.
///
/// `n` must be positive.
pub fn quantile_indices(n: usize) -> (usize, usize) {
    let lo = (n as f64 * LOW_QUANTILE) as usize;
    let hi = ((n as f64 * HIGH_QUANTILE) as usize).min(n.saturating_sub(1));
    (lo.min(hi), hi)
}

/// Per-event-ratio reduction: sort and pick the quantile positions.
///
/// Ratios are already relative to each event's nominal, no further
/// normalization is applied. Returns `None` for an empty list.
pub fn per_event_envelope(mut ratios: Vec<f64>) -> Option<Envelope> {
    if ratios.is_empty() {
        return None;
    }
    ratios.sort_by(f64::total_cmp);
    let (lo, hi) = quantile_indices(ratios.len());

    Some(Envelope {
        nominal: 1.0,
        low: ratios[lo],
        high: ratios[hi],
        n_events: ratios.len() as u64,
        curves: Curves::Events(ratios),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_yield_sum_fixed_indices() {
        // nominal 1, replicas 2..=100 -> sorted [1..=100]
        let sums: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let env = yield_sum_envelope(&sums, 3, EnvelopeIndices::default()).unwrap();
        assert_eq!(env.nominal, 1.0);
        assert_abs_diff_eq!(env.low, 16.0);
        assert_abs_diff_eq!(env.high, 84.0);
        assert_eq!(env.n_events, 3);
    }

    #[test]
    fn test_yield_sum_sorts_before_indexing() {
        let sums: Vec<f64> = (1..=100).rev().map(|v| v as f64).collect();
        let env = yield_sum_envelope(&sums, 1, EnvelopeIndices::default()).unwrap();
        // nominal is sums[0] = 100
        assert_abs_diff_eq!(env.low, 0.16, epsilon = 1e-12);
        assert_abs_diff_eq!(env.high, 0.84, epsilon = 1e-12);
        let Curves::Replicas(r) = &env.curves else { panic!("expected replica curves") };
        assert_eq!(r.len(), 100);
        // Replica curves keep replica order.
        assert_abs_diff_eq!(r[0], 1.0);
        assert_abs_diff_eq!(r[99], 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_yield_sum_zero_nominal() {
        let mut sums = vec![2.0; 100];
        sums[0] = 0.0;
        let env = yield_sum_envelope(&sums, 5, EnvelopeIndices::default()).unwrap();
        assert_eq!(env.nominal, 1.0);
        assert!(env.low.is_finite() && env.high.is_finite());
        assert_abs_diff_eq!(env.high, 2.0);
        let Curves::Replicas(r) = &env.curves else { panic!("expected replica curves") };
        assert!(r.iter().all(|v| v.is_finite()));
        assert_eq!(r[0], 0.0);
    }

    #[test]
    fn test_yield_sum_no_events_is_no_data() {
        assert!(yield_sum_envelope(&[0.0; 100], 0, EnvelopeIndices::default()).is_none());
        assert!(yield_sum_envelope(&[1.0; 10], 1, EnvelopeIndices::default()).is_none());
    }

    #[test]
    fn test_quantile_indices() {
        assert_eq!(quantile_indices(10), (1, 8));
        assert_eq!(quantile_indices(1), (0, 0));
        assert_eq!(quantile_indices(2), (0, 1));
        assert_eq!(quantile_indices(100), (16, 84));
    }

    #[test]
    fn test_per_event_envelope() {
        let ratios = vec![0.5, 0.1, 1.0, 0.3, 0.2, 0.9, 0.8, 0.4, 0.7, 0.6];
        let env = per_event_envelope(ratios).unwrap();
        assert_abs_diff_eq!(env.low, 0.2);
        assert_abs_diff_eq!(env.high, 0.9);
        assert_eq!(env.nominal, 1.0);
        assert_eq!(env.n_events, 10);
        let Curves::Events(sorted) = &env.curves else { panic!("expected event curves") };
        assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
        assert!(per_event_envelope(Vec::new()).is_none());
    }

    #[test]
    fn test_nan_does_not_panic() {
        let env = per_event_envelope(vec![f64::NAN, 1.0, 0.5]).unwrap();
        assert_eq!(env.n_events, 3);
    }
}
