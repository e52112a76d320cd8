use super::{ConvergenceTrace, TimingBreakdown};
use crate::detector::record::DetectionRecord;
use crate::fit::{FitStrategy, PeakPair};
use crate::histogram::Histogram;
use serde::Serialize;

/// JSON report written by the tool for one finalized epoch.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub input: InputDescriptor,
    pub strategy: FitStrategy,
    pub histogram: Histogram,
    pub peaks: PeakPair,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fidelity: Option<f64>,
    pub success: bool,
    pub convergence: ConvergenceTrace,
    pub timings: TimingBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<DetectionRecord>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDescriptor {
    pub detector_id: usize,
    pub roi: String,
    pub image_rows: usize,
    pub image_cols: usize,
    pub epoch: u64,
    pub shots: usize,
    pub included: usize,
}
