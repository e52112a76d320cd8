//! Single-ROI detector: frames in, occupancy labels and records out.
//!
//! A [`Detector`] owns one ROI, one shot series and one record log. All
//! methods take `&self`; every piece of state sits behind its own mutex and
//! callers only ever receive owned copies, so a detector can be shared with a
//! worker thread or a rayon pool without further locking.
//!
//! ```no_run
//! use occupancy_detector::detector::{AnalysisRequest, Detector, DetectorParams, FinalizeRequest};
//! use occupancy_detector::roi::Roi;
//! use occupancy_detector::shots::FrameMessage;
//! use occupancy_detector::image::Frame;
//!
//! # fn example(frames: Vec<Frame>) -> occupancy_detector::Result<()> {
//! let roi = Roi::rect(0, (64, 64), (32, 32), (3, 3))?;
//! let detector = Detector::new(0, DetectorParams::default(), roi);
//! for (shot_id, frame) in frames.into_iter().enumerate() {
//!     let msg = FrameMessage { shot_id: shot_id as u64, frame, bias: 697.0 };
//!     let _ = detector.ingest(&msg);
//! }
//! let record = detector.finalize(&FinalizeRequest::new(0.5))?;
//! println!("loading = {:.3}", record.loading_probability);
//! # Ok(())
//! # }
//! ```
use super::convergence::{converge, AnalysisOutcome};
use super::params::DetectorParams;
use super::record::{sort_by_user_variable, DetectionRecord, RecordInputs};
use crate::config::{DetectorConfig, RoiConfig};
use crate::correlate::OccupancyStream;
use crate::error::{DetectionError, Result};
use crate::fit::FitStrategy;
use crate::histogram::Histogram;
use crate::persist::{self, TableMeta};
use crate::roi::Roi;
use crate::shots::{Accumulator, FrameMessage, Shot, ShotSeries};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;

/// Options of one analysis call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AnalysisRequest {
    /// Overrides the detector's configured strategy.
    pub strategy: Option<FitStrategy>,
    /// Keep the ROI's current threshold instead of optimising it.
    pub fix_threshold: bool,
}

/// Options of a finalize call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FinalizeRequest {
    /// External sweep value stored with the record.
    pub user_variable: f64,
    pub analysis: AnalysisRequest,
    /// Start a new epoch once the record is appended. The finalized shots
    /// stay available through [`DetectorSnapshot::finalized`].
    pub reset: bool,
}

impl FinalizeRequest {
    pub fn new(user_variable: f64) -> Self {
        Self {
            user_variable,
            analysis: AnalysisRequest::default(),
            reset: true,
        }
    }
}

/// Shots of the most recently finalized epoch and the threshold they were
/// labelled with.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedEpoch {
    pub series: ShotSeries,
    pub threshold: f64,
}

/// Immutable copy of a detector's state.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorSnapshot {
    pub detector_id: usize,
    pub roi: String,
    pub threshold: f64,
    /// Current epoch; empty right after a resetting finalize.
    pub series: ShotSeries,
    pub finalized: Option<FinalizedEpoch>,
    pub records: Vec<DetectionRecord>,
}

impl DetectorSnapshot {
    /// Occupancy labels of the included shots.
    ///
    /// Uses the last finalized epoch when there is one, so a finalize with
    /// `reset = true` still leaves something to correlate. Before the first
    /// finalize the current series is labelled at the snapshot threshold.
    pub fn occupancy(&self) -> OccupancyStream {
        match &self.finalized {
            Some(epoch) => OccupancyStream::from_shots(&epoch.series.shots, epoch.threshold),
            None => OccupancyStream::from_shots(&self.series.shots, self.threshold),
        }
    }
}

pub struct Detector {
    id: usize,
    params: DetectorParams,
    roi: Mutex<Roi>,
    shots: Accumulator,
    last: Mutex<Option<AnalysisOutcome>>,
    finalized: Mutex<Option<FinalizedEpoch>>,
    log: Mutex<Vec<DetectionRecord>>,
}

impl Detector {
    pub fn new(id: usize, params: DetectorParams, roi: Roi) -> Self {
        Self {
            id,
            params,
            roi: Mutex::new(roi),
            shots: Accumulator::new(),
            last: Mutex::new(None),
            finalized: Mutex::new(None),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Build a detector for images of `image_shape = (rows, cols)`.
    pub fn from_config(
        id: usize,
        image_shape: (usize, usize),
        detector: &DetectorConfig,
        roi: &RoiConfig,
    ) -> Result<Self> {
        let params = detector.resolve()?;
        let roi = Roi::from_config(id, image_shape, roi)?;
        Ok(Self::new(id, params, roi))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Copy of the current ROI.
    pub fn roi(&self) -> Roi {
        self.roi.lock().clone()
    }

    /// Mutate the ROI in place, e.g. to translate, resize or set a threshold.
    pub fn with_roi<R>(&self, f: impl FnOnce(&mut Roi) -> R) -> R {
        f(&mut self.roi.lock())
    }

    /// Integrate one frame. A shape mismatch still appends an excluded shot.
    pub fn ingest(&self, message: &FrameMessage) -> Result<Shot> {
        let roi = self.roi.lock();
        self.shots.ingest(message, &roi)
    }

    /// Append shots reloaded from a table.
    pub fn extend(&self, shots: impl IntoIterator<Item = Shot>) {
        self.shots.extend(shots);
    }

    pub fn set_include(&self, shot_id: u64, include: bool) -> bool {
        self.shots.set_include(shot_id, include)
    }

    /// Histogram of the included counts with the configured bins.
    pub fn histogram(&self) -> Histogram {
        Histogram::build(&self.shots.snapshot().counts(), self.params.fixed_bins.as_deref())
    }

    /// Run the fit/threshold iteration on the current series.
    ///
    /// Fails only when fewer than two included shots exist. A failed fit is
    /// an `Ok` outcome with `success = false`; the ROI threshold is updated
    /// only on success.
    pub fn analyse(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome> {
        let series = self.shots.snapshot();
        self.analyse_series(&series, request)
    }

    fn analyse_series(
        &self,
        series: &ShotSeries,
        request: &AnalysisRequest,
    ) -> Result<AnalysisOutcome> {
        let counts = series.counts();
        if counts.len() < 2 {
            return Err(DetectionError::InsufficientData {
                stage: "analysis",
                found: counts.len(),
                minimum: 2,
            });
        }
        let (threshold, fixed) = {
            let roi = self.roi.lock();
            (roi.threshold(), request.fix_threshold || !roi.is_auto_threshold())
        };
        let strategy = request.strategy.unwrap_or(self.params.strategy);
        let outcome = converge(&counts, threshold, fixed, strategy, &self.params);
        if outcome.success {
            self.roi.lock().set_threshold(outcome.threshold);
        } else {
            warn!(
                "Detector[{}]::analyse {} failed, keeping threshold {threshold:.2}",
                self.id,
                strategy.name()
            );
        }
        *self.last.lock() = Some(outcome.clone());
        Ok(outcome)
    }

    /// Analyse the current epoch and append its record to the log.
    ///
    /// The record's `File ID` is its position in the log. When the analysis
    /// fails the record is still appended, with zeroed peak columns and
    /// `include = false`. Errors only when the epoch has no shots.
    pub fn finalize(&self, request: &FinalizeRequest) -> Result<DetectionRecord> {
        let series = if request.reset {
            self.shots.drain()
        } else {
            self.shots.snapshot()
        };
        if series.is_empty() {
            return Err(DetectionError::InsufficientData {
                stage: "finalize",
                found: 0,
                minimum: 1,
            });
        }
        let outcome = match self.analyse_series(&series, &request.analysis) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!("Detector[{}]::finalize {err}", self.id);
                None
            }
        };
        let roi = self.roi();
        let succeeded = outcome.as_ref().filter(|o| o.success);

        let mut log = self.log.lock();
        let record = DetectionRecord::derive(&RecordInputs {
            file_id: log.len() as u64,
            series: &series,
            roi_descriptor: roi.descriptor(),
            pixels: roi.pixel_count(),
            user_variable: request.user_variable,
            threshold: roi.threshold(),
            peaks: succeeded.map(|o| o.peaks),
            fidelity: succeeded.map(|o| o.fidelity).unwrap_or_default(),
            include: succeeded.is_some_and(|o| o.include),
            noise: self.params.noise,
        })?;
        debug!(
            "Detector[{}]::finalize file={} shots={} loading={:.3} include={}",
            self.id, record.file_id, record.processed, record.loading_probability, record.include
        );
        log.push(record.clone());
        *self.finalized.lock() = Some(FinalizedEpoch {
            series,
            threshold: record.threshold,
        });
        Ok(record)
    }

    /// Clear the series and start a new epoch.
    pub fn reset(&self) -> u64 {
        self.shots.reset()
    }

    pub fn series(&self) -> ShotSeries {
        self.shots.snapshot()
    }

    pub fn last_analysis(&self) -> Option<AnalysisOutcome> {
        self.last.lock().clone()
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        self.log.lock().clone()
    }

    pub fn snapshot(&self) -> DetectorSnapshot {
        let roi = self.roi();
        DetectorSnapshot {
            detector_id: self.id,
            roi: roi.descriptor(),
            threshold: roi.threshold(),
            series: self.shots.snapshot(),
            finalized: self.finalized.lock().clone(),
            records: self.records(),
        }
    }

    /// Stable sort of the log by user variable.
    pub fn sort_log_by_user_variable(&self) {
        sort_by_user_variable(&mut self.log.lock());
    }

    fn table_meta(&self, roi: &Roi) -> TableMeta {
        TableMeta::new(&[
            ("Detector ID", self.id.to_string()),
            ("ROI xc ; yc ; size", roi.descriptor()),
            ("Threshold", roi.threshold().to_string()),
            ("Bias", self.params.bias.to_string()),
            ("Read noise", self.params.noise.read_noise.to_string()),
            ("Pre-amp gain", self.params.noise.preamp_gain.to_string()),
            ("EM gain", self.params.noise.em_gain.to_string()),
        ])
    }

    /// Write the record log. The in-memory log is kept on failure.
    pub fn save_log(&self, path: &Path) -> Result<()> {
        let meta = self.table_meta(&self.roi());
        persist::save_log(path, &meta, &self.records())
    }

    /// Replace the record log with the one stored at `path`.
    pub fn load_log(&self, path: &Path) -> Result<usize> {
        let (_, records) = persist::load_log(path)?;
        let n = records.len();
        *self.log.lock() = records;
        Ok(n)
    }

    /// Write the current epoch's shots labelled at the ROI threshold.
    pub fn save_shots(&self, path: &Path) -> Result<()> {
        let roi = self.roi();
        let series = self.shots.snapshot();
        persist::save_shots(path, &self.table_meta(&roi), &series.shots, roi.threshold())
    }

    /// Append the shots stored at `path` to the current epoch.
    pub fn load_shots(&self, path: &Path) -> Result<usize> {
        let (_, rows) = persist::load_shots(path)?;
        let n = rows.len();
        self.shots.extend(rows.into_iter().map(|r| r.shot));
        Ok(n)
    }
}
