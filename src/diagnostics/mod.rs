//! Serializable diagnostics returned alongside each analysis.
//!
//! `ConvergenceTrace` records every round of the threshold/fit iteration,
//! `TimingBreakdown` the elapsed time per stage, and `AnalysisReport` bundles
//! both with the histogram and the resulting record for the tool's JSON
//! output.

pub mod convergence;
pub mod report;
pub mod timing;

pub use convergence::{ConvergenceIteration, ConvergenceTrace};
pub use report::{AnalysisReport, InputDescriptor};
pub use timing::{elapsed_ms, Stage, TimingBreakdown};
