//! Occupancy detector: one ROI, one shot series, one record log.
//!
//! Overview
//! - Frames are integrated against the ROI mask into [`Shot`](crate::shots::Shot)s.
//! - The included counts are histogrammed, two populations are located and
//!   fitted with the selected [`FitStrategy`](crate::fit::FitStrategy), and
//!   the threshold is moved to maximise fidelity. Fit and threshold are
//!   iterated until the threshold settles.
//! - Finalizing an epoch derives a [`DetectionRecord`] with Jeffreys
//!   confidence intervals and appends it to the detector's log.
//!
//! Modules
//! - [`params`] – resolved detector settings.
//! - `pipeline` – the [`Detector`] itself.
//! - `convergence` – the fit/threshold iteration.
//! - [`record`] – the per-epoch record and its table columns.
//! - [`bank`] – several detectors fed from one acquisition stream.
//! - [`worker`] – a detector running on its own thread.
pub mod bank;
mod convergence;
pub mod params;
mod pipeline;
pub mod record;
pub mod worker;

pub use bank::DetectorBank;
pub use convergence::{converge, seed_threshold, update_threshold, AnalysisOutcome};
pub use params::{ConvergenceParams, DetectorParams, NoiseModel, ThresholdPolicy};
pub use pipeline::{AnalysisRequest, Detector, DetectorSnapshot, FinalizeRequest, FinalizedEpoch};
pub use record::{Column, DetectionRecord, PopulationStats, RecordInputs};
pub use worker::DetectorWorker;
