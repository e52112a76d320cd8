use serde::{Deserialize, Serialize};

/// State after one Fit → UpdateThreshold → CheckConvergence round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceIteration {
    pub index: usize,
    pub threshold: f64,
    /// Fidelity at `threshold`; `None` when the optimizer reported failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fidelity: Option<f64>,
    pub fit_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduced_chi2: Option<f64>,
    /// `|Δt| / t_prev` against the previous iteration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_change: Option<f64>,
}

/// Full history of one convergence run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceTrace {
    pub iterations: Vec<ConvergenceIteration>,
    /// The relative change dropped below tolerance before the bound.
    pub converged: bool,
    /// A final settle pass ran after the loop.
    pub settled: bool,
    pub threshold_fixed: bool,
}

impl ConvergenceTrace {
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn last_threshold(&self) -> Option<f64> {
        self.iterations.last().map(|it| it.threshold)
    }
}
