//! Parameter types configuring a detector instance.
//!
//! The noise model only feeds the derived noise-budget columns of a record;
//! detection and thresholding never read it. Defaults match an EMCCD run
//! with the EM stage off.
use crate::fit::FitStrategy;
use serde::{Deserialize, Serialize};

/// Camera noise parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseModel {
    /// Read noise per pixel, in counts.
    pub read_noise: f64,
    /// Pre-amplifier gain, electrons per count.
    pub preamp_gain: f64,
    /// Electron-multiplying gain.
    pub em_gain: f64,
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self {
            read_noise: 8.8,
            preamp_gain: 4.5,
            em_gain: 1.0,
        }
    }
}

impl NoiseModel {
    /// Excess noise factor: 2 with EM gain, 1 without.
    pub fn excess_factor(&self) -> f64 {
        if self.em_gain > 1.0 {
            2.0
        } else {
            1.0
        }
    }

    /// `√(pixels·Nr² + f·G_em·mean/G_pa)`, or 0 when the variance is not
    /// positive.
    pub fn budget(&self, pixels: f64, mean: f64) -> f64 {
        let gain = if self.preamp_gain != 0.0 {
            self.excess_factor() * self.em_gain / self.preamp_gain
        } else {
            0.0
        };
        let variance = pixels * self.read_noise.powi(2) + gain * mean;
        if variance > 0.0 && variance.is_finite() {
            variance.sqrt()
        } else {
            0.0
        }
    }
}

/// How the convergence loop moves an unfixed threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// Maximise the two-population fidelity; histogram minimum when that fails.
    #[default]
    FidelitySearch,
    /// Valley of the smoothed histogram.
    HistogramMinimum,
}

/// Bounds of the fit/threshold fixed-point iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceParams {
    pub max_iterations: usize,
    /// Relative threshold change below which the loop stops.
    pub tolerance: f64,
}

impl Default for ConvergenceParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 0.0015,
        }
    }
}

/// Detector-wide parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Bias subtracted from frames that do not carry their own.
    pub bias: f64,
    pub noise: NoiseModel,
    pub strategy: FitStrategy,
    pub threshold_policy: ThresholdPolicy,
    pub convergence: ConvergenceParams,
    /// Candidates evaluated by the fidelity search.
    pub search_candidates: usize,
    /// Histogram edges used verbatim instead of the adaptive layout.
    pub fixed_bins: Option<Vec<f64>>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            bias: 697.0,
            noise: NoiseModel::default(),
            strategy: FitStrategy::Quick,
            threshold_policy: ThresholdPolicy::FidelitySearch,
            convergence: ConvergenceParams::default(),
            search_candidates: 10,
            fixed_bins: None,
        }
    }
}
