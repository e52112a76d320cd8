//! Fixed-point iteration between the distribution fit and the threshold.
//!
//! Each round runs **Fit** (the selected strategy), **UpdateThreshold**
//! (skipped while the threshold is held fixed) and **CheckConvergence**
//! (relative change against the previous round). The loop is bounded; when it
//! ends on a successful fit one more settle pass is run. Nothing here returns
//! an error: a failing fit leaves the previous peaks and threshold in place
//! and the outcome carries `success = false`.
use super::params::{DetectorParams, ThresholdPolicy};
use crate::diagnostics::{elapsed_ms, ConvergenceIteration, ConvergenceTrace, Stage, TimingBreakdown};
use crate::fit::{FitRequest, FitStrategy, PeakPair};
use crate::histogram::{minimum_threshold, Histogram};
use crate::roi::auto_threshold;
use crate::threshold::{fidelity, search_threshold, Fidelity};
use log::{debug, warn};
use serde::Serialize;
use std::time::Instant;

/// Background mean plus this many deviations seeds the threshold.
const SEED_SIGMAS: f64 = 5.0;

/// Result of one analysis of a shot series.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub strategy: FitStrategy,
    pub histogram: Histogram,
    pub peaks: PeakPair,
    pub threshold: f64,
    pub fidelity: Fidelity,
    /// False when a fit looked divergent; the record is kept but excluded.
    pub include: bool,
    /// True when the last fit of the loop succeeded.
    pub success: bool,
    pub threshold_fixed: bool,
    pub trace: ConvergenceTrace,
    pub timings: TimingBreakdown,
}

/// Initial threshold for an unfixed run.
///
/// Starts at the mean of the bin edges, moves to background mean + 5σ of the
/// counts below it, and finally to the histogram minimum when that is
/// positive.
pub fn seed_threshold(hist: &Histogram, counts: &[f64]) -> f64 {
    let mut threshold = hist.mid_threshold();
    let below: Vec<f64> = counts.iter().copied().filter(|&c| c < threshold).collect();
    if below.len() >= 2 {
        let n = below.len() as f64;
        let mean = below.iter().sum::<f64>() / n;
        let var = below.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
        threshold = mean + SEED_SIGMAS * var.sqrt();
    }
    match minimum_threshold(counts, hist.bin_count()) {
        Some(t) if t > 0.0 => t,
        _ => threshold,
    }
}

/// Threshold and fidelity after an UpdateThreshold step.
///
/// An automatically chosen threshold is kept between the two peak centres.
pub fn update_threshold(
    peaks: &PeakPair,
    counts: &[f64],
    policy: ThresholdPolicy,
    candidates: usize,
) -> (f64, Fidelity) {
    let searched = match policy {
        ThresholdPolicy::FidelitySearch => search_threshold(peaks, candidates),
        ThresholdPolicy::HistogramMinimum => None,
    };
    let (mut t, mut f) = match searched {
        Some(found) => (found.threshold, found.fidelity),
        None => {
            let t = auto_threshold(counts);
            (t, fidelity(peaks, t))
        }
    };
    let (mu0, mu1) = (peaks.background.center, peaks.signal.center);
    if mu1 > mu0 && !(mu0..=mu1).contains(&t) {
        t = t.clamp(mu0, mu1);
        f = fidelity(peaks, t);
    }
    (t, f)
}

/// `|t − prev| / |prev|`, or the absolute change when `prev` is zero.
fn relative_change(prev: f64, t: f64) -> f64 {
    let delta = (t - prev).abs();
    if prev != 0.0 {
        delta / prev.abs()
    } else {
        delta
    }
}

struct LoopState<'a> {
    hist: &'a Histogram,
    counts: &'a [f64],
    params: &'a DetectorParams,
    strategy: FitStrategy,
    threshold: f64,
    fixed: bool,
    peaks: PeakPair,
    fidelity: Fidelity,
    include: bool,
    reduced_chi2: Option<f64>,
    timings: TimingBreakdown,
}

impl LoopState<'_> {
    /// One Fit + UpdateThreshold round. False when the fit failed, in which
    /// case nothing was changed.
    fn pass(&mut self) -> bool {
        let fit_start = Instant::now();
        let request = FitRequest {
            histogram: self.hist,
            counts: self.counts,
            threshold: self.threshold,
            threshold_fixed: self.fixed,
        };
        let fitted = self.strategy.fit(&request);
        self.timings.add(Stage::Fit, elapsed_ms(fit_start));
        let fit = match fitted {
            Ok(fit) => fit,
            Err(err) => {
                warn!("converge: {err}");
                return false;
            }
        };

        let threshold_start = Instant::now();
        if fit.diverged() {
            warn!(
                "converge: {} reduced chi2 {:?} marks the record excluded",
                self.strategy.name(),
                fit.reduced_chi2
            );
            self.include = false;
        }
        if let Some(pinned) = fit.pinned_threshold {
            self.threshold = pinned;
            self.fixed = true;
        }
        self.peaks = fit.peaks;
        self.reduced_chi2 = fit.reduced_chi2;
        if self.fixed {
            self.fidelity = fidelity(&self.peaks, self.threshold);
        } else {
            let (t, f) = update_threshold(
                &self.peaks,
                self.counts,
                self.params.threshold_policy,
                self.params.search_candidates,
            );
            self.threshold = t;
            self.fidelity = f;
        }
        self.timings.add(Stage::Threshold, elapsed_ms(threshold_start));
        true
    }
}

/// Iterate fit and threshold on `counts` until the threshold settles.
///
/// `threshold` is used as-is when `fixed`; otherwise it is replaced by
/// [`seed_threshold`] before the first round.
pub fn converge(
    counts: &[f64],
    threshold: f64,
    fixed: bool,
    strategy: FitStrategy,
    params: &DetectorParams,
) -> AnalysisOutcome {
    let total_start = Instant::now();
    let mut timings = TimingBreakdown::default();

    let hist = timings.time(Stage::Histogram, || {
        Histogram::build(counts, params.fixed_bins.as_deref())
    });
    let initial = timings.time(Stage::Seed, || {
        if fixed {
            threshold
        } else {
            seed_threshold(&hist, counts)
        }
    });
    debug!(
        "converge start n={} bins={} strategy={} threshold={initial:.2} fixed={fixed}",
        counts.len(),
        hist.bin_count(),
        strategy.name()
    );

    let mut state = LoopState {
        hist: &hist,
        counts,
        params,
        strategy,
        threshold: initial,
        fixed,
        peaks: PeakPair::default(),
        fidelity: Fidelity::FAILED,
        include: true,
        reduced_chi2: None,
        timings,
    };
    let mut trace = ConvergenceTrace::default();
    let mut success = false;
    let limits = params.convergence;
    for index in 0..limits.max_iterations.max(1) {
        let before = state.threshold;
        success = state.pass();
        let change = relative_change(before, state.threshold);
        trace.iterations.push(ConvergenceIteration {
            index,
            threshold: state.threshold,
            fidelity: state.fidelity.is_valid().then_some(state.fidelity.value),
            fit_ok: success,
            reduced_chi2: state.reduced_chi2,
            relative_change: success.then_some(change),
        });
        if !success {
            break;
        }
        if state.fixed || change < limits.tolerance {
            trace.converged = true;
            break;
        }
    }
    if success {
        state.pass();
        trace.settled = true;
    }
    trace.threshold_fixed = state.fixed;

    let mut timings = state.timings;
    timings.total_ms = elapsed_ms(total_start);
    debug!(
        "converge done success={success} iterations={} threshold={:.2} fidelity={:.4}",
        trace.len(),
        state.threshold,
        state.fidelity.value
    );

    AnalysisOutcome {
        strategy,
        peaks: state.peaks,
        threshold: state.threshold,
        fidelity: state.fidelity,
        include: state.include,
        success,
        threshold_fixed: state.fixed,
        trace,
        timings,
        histogram: hist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{Peak, PeakRole};
    use statrs::distribution::{ContinuousCDF, Normal};

    fn quantiles(n: usize, mu: f64, sigma: f64) -> Vec<f64> {
        let d = Normal::new(mu, sigma).expect("valid normal");
        (0..n).map(|i| d.inverse_cdf((i as f64 + 0.5) / n as f64)).collect()
    }

    fn bimodal() -> Vec<f64> {
        let mut counts = quantiles(1000, 500.0, 20.0);
        counts.extend(quantiles(1000, 900.0, 25.0));
        counts
    }

    #[test]
    fn quick_strategy_separates_populations() {
        let counts = bimodal();
        let out = converge(&counts, 0.0, false, FitStrategy::Quick, &DetectorParams::default());
        assert!(out.success);
        assert!(out.threshold > 500.0 && out.threshold < 900.0, "t={}", out.threshold);
        assert!(out.fidelity.value >= 0.99, "f={}", out.fidelity.value);
        assert!(out.trace.settled);
        assert!(out.trace.len() <= 20);
        assert!(out.include);
        // One fit per round plus the settle pass.
        assert_eq!(out.timings.fit_calls, out.trace.len() + 1);
        assert!(out.timings.total_ms >= out.timings.stage_ms(Stage::Fit));
    }

    #[test]
    fn fixed_threshold_runs_one_round() {
        let counts = bimodal();
        let out = converge(&counts, 700.0, true, FitStrategy::Quick, &DetectorParams::default());
        assert_eq!(out.threshold, 700.0);
        assert_eq!(out.trace.len(), 1);
        assert!(out.trace.converged);
        assert!(out.threshold_fixed);
    }

    #[test]
    fn single_gaussian_pins_threshold_above_counts() {
        let counts = quantiles(500, 500.0, 20.0);
        let out = converge(
            &counts,
            0.0,
            false,
            FitStrategy::SingleGaussian,
            &DetectorParams::default(),
        );
        assert!(out.success);
        assert!(out.threshold_fixed);
        let max = counts.iter().copied().fold(f64::MIN, f64::max);
        assert!(out.threshold >= max);
        assert_eq!(out.peaks.signal.center, 0.0);
    }

    #[test]
    fn failed_fit_reports_without_panicking() {
        // Three fixed bins cannot support a six-parameter fit.
        let params = DetectorParams {
            fixed_bins: Some(vec![0.0, 1.0, 2.0, 3.0]),
            ..DetectorParams::default()
        };
        let counts = vec![0.5, 0.6, 2.5];
        let out = converge(&counts, 0.0, false, FitStrategy::DoubleGaussian, &params);
        assert!(!out.success);
        assert!(!out.trace.settled);
        assert_eq!(out.trace.len(), 1);
        assert_eq!(out.peaks, PeakPair::default());
    }

    #[test]
    fn update_threshold_clamps_between_centres() {
        let peaks = PeakPair {
            background: Peak::new(PeakRole::Background, 10.0, 100.0, 1.0),
            signal: Peak::new(PeakRole::Signal, 10.0, 110.0, 1.0),
        };
        let counts: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 0.0 } else { 1000.0 }).collect();
        let (t, _) = update_threshold(&peaks, &counts, ThresholdPolicy::HistogramMinimum, 10);
        assert!((100.0..=110.0).contains(&t), "t={t}");
    }

    #[test]
    fn relative_change_handles_zero_previous() {
        assert_eq!(relative_change(0.0, 3.0), 3.0);
        assert!((relative_change(200.0, 201.0) - 0.005).abs() < 1e-12);
    }
}
