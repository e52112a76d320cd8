//! Two-population distribution fitting.
//!
//! Every strategy starts from the histogram peak estimate and returns a
//! [`PeakPair`] (amplitude, centre, width for background and signal). The
//! caller's state is never touched on failure: strategies return a
//! [`DetectionError`] and the convergence loop keeps its previous peaks.
pub mod lm;
pub mod models;

use crate::error::{DetectionError, Result};
use crate::histogram::{locate, Histogram};
use lm::{optimize, CurveModel, LmConfig};
use log::debug;
use models::{DoubleGaussian, DoublePoisson, Gaussian};
use serde::{Deserialize, Serialize};

/// Reduced χ² above which a fit is treated as divergent.
pub const DIVERGENCE_CHI2: f64 = 1e9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakRole {
    Background,
    Signal,
}

/// One population in count units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Histogram bin of the maximum, when the peak came from the locator.
    pub index: Option<usize>,
    pub amplitude: f64,
    pub center: f64,
    pub width: f64,
    pub role: PeakRole,
}

impl Peak {
    pub fn new(role: PeakRole, amplitude: f64, center: f64, width: f64) -> Self {
        Self {
            index: None,
            amplitude,
            center,
            width,
            role,
        }
    }

    pub fn zero(role: PeakRole) -> Self {
        Self::new(role, 0.0, 0.0, 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.amplitude.is_finite() && self.center.is_finite() && self.width.is_finite()
    }
}

/// Background and signal populations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakPair {
    pub background: Peak,
    pub signal: Peak,
}

impl Default for PeakPair {
    fn default() -> Self {
        Self {
            background: Peak::zero(PeakRole::Background),
            signal: Peak::zero(PeakRole::Signal),
        }
    }
}

impl PeakPair {
    pub fn is_finite(&self) -> bool {
        self.background.is_finite() && self.signal.is_finite()
    }

    pub fn separation(&self) -> f64 {
        self.signal.center - self.background.center
    }
}

/// Initial two-population estimate.
///
/// Uses the two histogram peaks when the locator finds them. Otherwise the
/// sorted counts are split at the median and the two halves' means and
/// standard deviations stand in for the populations, with the tallest bin as
/// both amplitudes. Never fails; a one-element series gives zero widths.
pub fn estimate_peaks(hist: &Histogram, counts: &[f64]) -> PeakPair {
    let located = locate(hist);
    if let [background, signal] = located.as_slice() {
        return PeakPair {
            background: *background,
            signal: *signal,
        };
    }
    let mut sorted: Vec<f64> = counts.iter().copied().filter(|c| c.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let height = hist.occupancy.iter().copied().max().unwrap_or(0) as f64;
    let (lower, upper) = sorted.split_at(mid);
    let (m0, s0) = population_moments(lower);
    let (m1, s1) = population_moments(upper);
    debug!(
        "estimate_peaks: {} peaks located, median split at {mid} of {}",
        located.len(),
        sorted.len()
    );
    PeakPair {
        background: Peak::new(PeakRole::Background, height, m0, s0),
        signal: Peak::new(PeakRole::Signal, height, m1, s1),
    }
}

/// Mean and population standard deviation; `(0, 0)` for an empty slice.
fn population_moments(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Closed set of fitting strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStrategy {
    /// Histogram peak estimate, no fit.
    #[default]
    Quick,
    /// Joint two-Gaussian mixture fit.
    DoubleGaussian,
    /// Independent Gaussian fits either side of the threshold.
    SeparateGaussians,
    /// Two-component Poisson mixture; widths are `√μ`.
    DoublePoissonian,
    /// Background only; the signal population is zeroed.
    SingleGaussian,
}

impl FitStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            FitStrategy::Quick => "quick",
            FitStrategy::DoubleGaussian => "double_gaussian",
            FitStrategy::SeparateGaussians => "separate_gaussians",
            FitStrategy::DoublePoissonian => "double_poissonian",
            FitStrategy::SingleGaussian => "single_gaussian",
        }
    }
}

/// Inputs of one fit step.
#[derive(Clone, Copy, Debug)]
pub struct FitRequest<'a> {
    pub histogram: &'a Histogram,
    pub counts: &'a [f64],
    pub threshold: f64,
    /// Threshold held by the caller; bounds the double-Gaussian centres.
    pub threshold_fixed: bool,
}

/// Result of a successful fit step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FitOutcome {
    pub peaks: PeakPair,
    /// Reduced Pearson χ² of the fitted curve; `None` for the quick estimate.
    pub reduced_chi2: Option<f64>,
    /// Threshold the strategy imposes, and holds fixed, for this record.
    pub pinned_threshold: Option<f64>,
}

impl FitOutcome {
    /// True when the goodness of fit is so large it signals a diverged fit.
    pub fn diverged(&self) -> bool {
        self.reduced_chi2
            .is_some_and(|c| !c.is_finite() || c.abs() > DIVERGENCE_CHI2)
    }
}

impl FitStrategy {
    /// Run this strategy on `request`.
    pub fn fit(&self, request: &FitRequest<'_>) -> Result<FitOutcome> {
        let hist = request.histogram;
        let x = hist.centers();
        let y: Vec<f64> = hist.occupancy.iter().map(|&c| c as f64).collect();
        let estimate = estimate_peaks(hist, request.counts);
        let config = LmConfig::default();

        let outcome = match self {
            FitStrategy::Quick => FitOutcome {
                peaks: estimate,
                reduced_chi2: None,
                pinned_threshold: None,
            },
            FitStrategy::DoubleGaussian => {
                let (h0, h1) = (estimate.background.amplitude, estimate.signal.amplitude);
                let total = h0 + h1;
                let fraction = if total > 0.0 { h1 / total } else { 0.5 };
                let model = DoubleGaussian {
                    split: request.threshold_fixed.then_some(request.threshold),
                };
                let init = [
                    total,
                    fraction,
                    estimate.background.center,
                    estimate.background.width,
                    estimate.signal.center,
                    estimate.signal.width,
                ];
                let p = self.run(&model, &x, &y, init, &config)?;
                let [n, f, mut mu0, mut sig0, mut mu1, mut sig1] = p;
                let (mut a0, mut a1) = (n * (1.0 - f), n * f);
                if mu0 > mu1 {
                    std::mem::swap(&mut mu0, &mut mu1);
                    std::mem::swap(&mut sig0, &mut sig1);
                    std::mem::swap(&mut a0, &mut a1);
                }
                FitOutcome {
                    peaks: pair(a0, mu0, sig0, a1, mu1, sig1),
                    reduced_chi2: Some(reduced_chi2(&model, &x, &y, &p)),
                    pinned_threshold: None,
                }
            }
            FitStrategy::SeparateGaussians => {
                let split = nearest_edge(hist, request.threshold);
                let bins = x.len();
                if split < 3 || bins - split < 3 {
                    return Err(DetectionError::InsufficientData {
                        stage: "separate gaussian fit",
                        found: split.min(bins - split),
                        minimum: 3,
                    });
                }
                let (xl, xu) = x.split_at(split);
                let (yl, yu) = y.split_at(split);
                let lower = self.run(&Gaussian, xl, yl, moment_guess(xl, yl), &config)?;
                let upper = self.run(&Gaussian, xu, yu, moment_guess(xu, yu), &config)?;
                let chi2 = {
                    let (a0, a1) = (lower[0], upper[0]);
                    let joint = [a0 + a1, a1 / (a0 + a1), lower[1], lower[2], upper[1], upper[2]];
                    reduced_chi2(&DoubleGaussian { split: None }, &x, &y, &joint)
                };
                FitOutcome {
                    peaks: pair(lower[0], lower[1], lower[2], upper[0], upper[1], upper[2]),
                    reduced_chi2: Some(chi2),
                    pinned_threshold: None,
                }
            }
            FitStrategy::DoublePoissonian => {
                let init = [
                    estimate.background.amplitude,
                    estimate.background.center,
                    estimate.signal.amplitude,
                    estimate.signal.center,
                ];
                let p = self.run(&DoublePoisson, &x, &y, init, &config)?;
                let [a0, mu0, a1, mu1] = p;
                FitOutcome {
                    peaks: pair(a0, mu0, mu0.sqrt(), a1, mu1, mu1.sqrt()),
                    reduced_chi2: Some(reduced_chi2(&DoublePoisson, &x, &y, &p)),
                    pinned_threshold: None,
                }
            }
            FitStrategy::SingleGaussian => {
                let p = self.run(&Gaussian, &x, &y, moment_guess(&x, &y), &config)?;
                FitOutcome {
                    peaks: PeakPair {
                        background: Peak::new(PeakRole::Background, p[0], p[1], p[2]),
                        signal: Peak::zero(PeakRole::Signal),
                    },
                    reduced_chi2: Some(reduced_chi2(&Gaussian, &x, &y, &p)),
                    pinned_threshold: Some(hist.max_edge()),
                }
            }
        };

        if !outcome.peaks.is_finite() {
            return Err(self.diverged("non-finite peak parameters"));
        }
        debug!(
            "FitStrategy::{} bg=({:.2}, {:.2}) signal=({:.2}, {:.2}) rchi2={:?}",
            self.name(),
            outcome.peaks.background.center,
            outcome.peaks.background.width,
            outcome.peaks.signal.center,
            outcome.peaks.signal.width,
            outcome.reduced_chi2
        );
        Ok(outcome)
    }

    fn run<const N: usize, M: CurveModel<N>>(
        &self,
        model: &M,
        x: &[f64],
        y: &[f64],
        init: [f64; N],
        config: &LmConfig,
    ) -> Result<[f64; N]> {
        if x.len() < N {
            return Err(DetectionError::InsufficientData {
                stage: self.name(),
                found: x.len(),
                minimum: N,
            });
        }
        if init.iter().any(|v| !v.is_finite()) {
            return Err(self.diverged("non-finite initial estimate"));
        }
        let res = optimize(model, x, y, init, config);
        if !res.converged {
            return Err(self.diverged(&format!(
                "no convergence after {} iterations (chi2 {:.3e})",
                res.iterations, res.chi2
            )));
        }
        if res.params.iter().any(|v| !v.is_finite()) {
            return Err(self.diverged("non-finite parameters"));
        }
        Ok(res.params)
    }

    fn diverged(&self, reason: &str) -> DetectionError {
        DetectionError::FitDivergence {
            strategy: self.name(),
            reason: reason.to_string(),
        }
    }
}

fn pair(a0: f64, mu0: f64, sig0: f64, a1: f64, mu1: f64, sig1: f64) -> PeakPair {
    PeakPair {
        background: Peak::new(PeakRole::Background, a0, mu0, sig0),
        signal: Peak::new(PeakRole::Signal, a1, mu1, sig1),
    }
}

/// Index of the bin edge closest to `value`.
fn nearest_edge(hist: &Histogram, value: f64) -> usize {
    hist.edges
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - value).abs().total_cmp(&(b.1 - value).abs()))
        .map_or(0, |(i, _)| i)
}

/// `[A, μ, σ]` from the tallest bin and the weighted second moment.
fn moment_guess(x: &[f64], y: &[f64]) -> [f64; 3] {
    let total: f64 = y.iter().sum();
    let (peak_x, peak_y) = x
        .iter()
        .zip(y)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or((0.0, 0.0), |(&px, &py)| (px, py));
    if total <= 0.0 {
        return [peak_y, peak_x, 1.0];
    }
    let mean = x.iter().zip(y).map(|(xi, yi)| xi * yi).sum::<f64>() / total;
    let var = x.iter().zip(y).map(|(xi, yi)| yi * (xi - mean).powi(2)).sum::<f64>() / total;
    let bin = match x {
        [a, b, ..] => (b - a).abs(),
        _ => 1.0,
    };
    [peak_y, peak_x, var.sqrt().max(0.5 * bin)]
}

/// `Σ (o − e)²/e / (bins − N)` over bins with a positive expectation.
pub fn reduced_chi2<const N: usize, M: CurveModel<N>>(
    model: &M,
    x: &[f64],
    y: &[f64],
    params: &[f64; N],
) -> f64 {
    let chi2: f64 = x
        .iter()
        .zip(y)
        .filter_map(|(&xi, &yi)| {
            let e = model.evaluate(xi, params);
            (e > 0.0).then(|| (yi - e).powi(2) / e)
        })
        .sum();
    let dof = x.len().saturating_sub(N).max(1);
    chi2 / dof as f64
}
