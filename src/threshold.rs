//! Fidelity model and threshold search.
//!
//! Both populations are treated as normal distributions. For a threshold `t`
//! the fidelity is `Φ(t; μ0, σ0) − Φ(t; μ1, σ1)`, i.e. one minus the
//! false-positive and false-negative rates. The search walks a linear grid
//! between the background peak and the signal peak and keeps the best
//! candidate, stopping early once the fidelity is essentially perfect.
use crate::fit::PeakPair;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Fidelity at which the search stops early.
pub const FIDELITY_TARGET: f64 = 0.9999;

/// Fidelity with its uncertainty; `(-1, -1)` marks a failed calculation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fidelity {
    pub value: f64,
    pub error: f64,
}

impl Fidelity {
    pub const FAILED: Fidelity = Fidelity {
        value: -1.0,
        error: -1.0,
    };

    pub fn is_valid(&self) -> bool {
        self.value >= 0.0
    }
}

impl Default for Fidelity {
    fn default() -> Self {
        Self::FAILED
    }
}

/// Result of a threshold search.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ThresholdSearch {
    pub threshold: f64,
    pub fidelity: Fidelity,
    /// Number of candidates evaluated before stopping.
    pub evaluated: usize,
}

fn cdf(t: f64, mean: f64, width: f64) -> Option<f64> {
    if !(t.is_finite() && mean.is_finite() && width.is_finite()) || width <= 0.0 {
        return None;
    }
    Normal::new(mean, width).ok().map(|n| n.cdf(t))
}

fn separation_fidelity(t: f64, mu0: f64, sig0: f64, mu1: f64, sig1: f64) -> Option<f64> {
    Some(cdf(t, mu0, sig0)? - cdf(t, mu1, sig1)?)
}

/// Fidelity of `threshold` against the two populations in `peaks`.
///
/// The error is the spread between the fidelity with both centres moved down
/// by their own widths and with both moved up by their own widths.
pub fn fidelity(peaks: &PeakPair, threshold: f64) -> Fidelity {
    let (mu0, sig0) = (peaks.background.center, peaks.background.width);
    let (mu1, sig1) = (peaks.signal.center, peaks.signal.width);
    let Some(value) = separation_fidelity(threshold, mu0, sig0, mu1, sig1) else {
        return Fidelity::FAILED;
    };
    // Both centres shift together by their own widths; the signal term is not
    // held at μ1 − σ1 on the upper side.
    let low = separation_fidelity(threshold, mu0 - sig0, sig0, mu1 - sig1, sig1);
    let high = separation_fidelity(threshold, mu0 + sig0, sig0, mu1 + sig1, sig1);
    match (low, high) {
        (Some(lo), Some(hi)) => Fidelity {
            value,
            error: (lo - hi).abs(),
        },
        _ => Fidelity::FAILED,
    }
}

/// Search `candidates` thresholds between `μ0 + σ0` and
/// `min(μ0 + 15σ0, μ1)` for the one maximising the fidelity.
///
/// Returns `None` when the peaks are unusable (degenerate widths, non-finite
/// centres) or when no candidate yields a positive fidelity.
pub fn search_threshold(peaks: &PeakPair, candidates: usize) -> Option<ThresholdSearch> {
    let (mu0, sig0) = (peaks.background.center, peaks.background.width);
    let mu1 = peaks.signal.center;
    if !(mu0.is_finite() && sig0.is_finite() && mu1.is_finite()) || sig0 <= 0.0 {
        return None;
    }
    let n = candidates.max(2);
    let start = mu0 + sig0;
    let stop = (start + 1.0).max((mu0 + 15.0 * sig0).min(mu1));
    let step = (stop - start) / (n - 1) as f64;

    let mut best: Option<ThresholdSearch> = None;
    let mut best_value = 0.0;
    let mut evaluated = 0;
    // The first grid point sits one width above the background centre and is skipped.
    for i in 1..n {
        let t = start + step * i as f64;
        evaluated += 1;
        let f = fidelity(peaks, t);
        if !f.is_valid() {
            return None;
        }
        if f.value > best_value {
            best_value = f.value;
            best = Some(ThresholdSearch {
                threshold: t,
                fidelity: f,
                evaluated,
            });
            if f.value > FIDELITY_TARGET {
                break;
            }
        }
    }
    best.map(|b| ThresholdSearch { evaluated, ..b })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{Peak, PeakPair, PeakRole};

    fn pair(mu0: f64, sig0: f64, mu1: f64, sig1: f64) -> PeakPair {
        PeakPair {
            background: Peak::new(PeakRole::Background, 100.0, mu0, sig0),
            signal: Peak::new(PeakRole::Signal, 100.0, mu1, sig1),
        }
    }

    #[test]
    fn well_separated_peaks_give_high_fidelity() {
        let peaks = pair(500.0, 20.0, 900.0, 25.0);
        let found = search_threshold(&peaks, 10).expect("search succeeds");
        assert!(found.threshold > 500.0 && found.threshold < 900.0);
        assert!(found.fidelity.value >= 0.99, "fid={}", found.fidelity.value);
        assert!(found.fidelity.error >= 0.0);
    }

    #[test]
    fn early_stop_once_target_reached() {
        let peaks = pair(100.0, 5.0, 1000.0, 5.0);
        let found = search_threshold(&peaks, 50).expect("search succeeds");
        assert!(found.fidelity.value > FIDELITY_TARGET);
        assert!(found.evaluated < 49);
    }

    #[test]
    fn zero_width_population_is_sentinel() {
        let peaks = pair(500.0, 20.0, 900.0, 0.0);
        assert_eq!(fidelity(&peaks, 700.0), Fidelity::FAILED);
        let degenerate = pair(500.0, 0.0, 900.0, 25.0);
        assert!(search_threshold(&degenerate, 10).is_none());
    }

    #[test]
    fn fidelity_error_shifts_both_centres_by_their_widths() {
        let phi = |t: f64, mu: f64, sig: f64| Normal::new(mu, sig).expect("valid").cdf(t);
        let t = 550.0;
        let f = fidelity(&pair(500.0, 20.0, 600.0, 40.0), t);
        let low = phi(t, 480.0, 20.0) - phi(t, 560.0, 40.0);
        let high = phi(t, 520.0, 20.0) - phi(t, 640.0, 40.0);
        assert!((f.error - (low - high).abs()).abs() < 1e-12);
        let pinned_signal = phi(t, 520.0, 20.0) - phi(t, 560.0, 40.0);
        assert!((f.error - (low - pinned_signal).abs()).abs() > 1e-3);
    }

    #[test]
    fn overlapping_peaks_lower_fidelity() {
        let far = fidelity(&pair(500.0, 20.0, 900.0, 25.0), 700.0);
        let near = fidelity(&pair(500.0, 60.0, 600.0, 60.0), 550.0);
        assert!(far.value > near.value);
        assert!(near.value > 0.0 && near.value < 1.0);
    }
}
