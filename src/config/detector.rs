use super::list::parse_number_list;
use crate::detector::params::{ConvergenceParams, DetectorParams, NoiseModel, ThresholdPolicy};
use crate::error::Result;
use crate::fit::FitStrategy;
use crate::roi::MaskKind;
use serde::{Deserialize, Serialize};

/// Per-detector settings as they appear in a JSON config.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Bias offset subtracted from every frame (counts).
    pub bias: f64,
    /// Read noise per pixel (counts).
    pub read_noise: f64,
    /// Pre-amplifier gain (electrons per count).
    pub preamp_gain: f64,
    /// Electron-multiplying gain.
    pub em_gain: f64,
    /// Fixed histogram edges as a comma-separated list; empty for adaptive bins.
    pub fixed_bins: String,
    pub strategy: FitStrategy,
    pub threshold_policy: ThresholdPolicy,
    /// Upper bound on fit/threshold iterations.
    pub max_iterations: usize,
    /// Relative threshold change that ends the iteration.
    pub tolerance: f64,
    /// Thresholds evaluated per fidelity search.
    pub search_candidates: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let params = DetectorParams::default();
        Self {
            bias: params.bias,
            read_noise: params.noise.read_noise,
            preamp_gain: params.noise.preamp_gain,
            em_gain: params.noise.em_gain,
            fixed_bins: String::new(),
            strategy: params.strategy,
            threshold_policy: params.threshold_policy,
            max_iterations: params.convergence.max_iterations,
            tolerance: params.convergence.tolerance,
            search_candidates: params.search_candidates,
        }
    }
}

impl DetectorConfig {
    pub fn resolve(&self) -> Result<DetectorParams> {
        let bins = parse_number_list(&self.fixed_bins)?;
        Ok(DetectorParams {
            bias: self.bias,
            noise: NoiseModel {
                read_noise: self.read_noise,
                preamp_gain: self.preamp_gain,
                em_gain: self.em_gain,
            },
            strategy: self.strategy,
            threshold_policy: self.threshold_policy,
            convergence: ConvergenceParams {
                max_iterations: self.max_iterations.max(1),
                tolerance: self.tolerance,
            },
            search_candidates: self.search_candidates.max(2),
            fixed_bins: (!bins.is_empty()).then_some(bins),
        })
    }
}

/// ROI geometry and threshold settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RoiConfig {
    pub center_x: usize,
    pub center_y: usize,
    pub width: usize,
    pub height: usize,
    pub mask: MaskKind,
    /// Initial threshold in counts.
    pub threshold: f64,
    /// Recompute the threshold from the data on every analysis.
    pub auto_threshold: bool,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            center_x: 1,
            center_y: 1,
            width: 1,
            height: 1,
            mask: MaskKind::Rect,
            threshold: 1.0,
            auto_threshold: true,
        }
    }
}
