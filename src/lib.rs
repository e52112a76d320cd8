#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod config;
pub mod correlate;
pub mod detector;
pub mod diagnostics;
pub mod error;
pub mod image;
pub mod persist;
pub mod roi;
pub mod shots;

// Statistical building blocks; public so tools can run single stages.
pub mod confidence;
pub mod fit;
pub mod histogram;
pub mod threshold;

// --- High-level re-exports -------------------------------------------------

pub use crate::detector::{
    AnalysisOutcome, AnalysisRequest, Detector, DetectorBank, DetectorParams, DetectorSnapshot,
    DetectorWorker, DetectionRecord, FinalizeRequest,
};
pub use crate::error::{DetectionError, Result};

pub use crate::confidence::{interval, BinomialInterval};
pub use crate::correlate::{Correlator, OccupancyQuery, OccupancyStream, RoiGroup};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```
/// use occupancy_detector::prelude::*;
///
/// # fn main() -> occupancy_detector::Result<()> {
/// let roi = Roi::rect(0, (5, 5), (2, 2), (1, 1))?;
/// let det = Detector::new(0, DetectorParams::default(), roi);
/// for (id, value) in [3.0, 4.0, 50.0, 52.0].into_iter().enumerate() {
///     let mut frame = Frame::zeros(5, 5);
///     frame[(2, 2)] = value;
///     det.ingest(&FrameMessage { shot_id: id as u64, frame, bias: 0.0 })?;
/// }
/// assert_eq!(det.series().len(), 4);
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::fit::FitStrategy;
    pub use crate::image::Frame;
    pub use crate::roi::Roi;
    pub use crate::shots::{FrameMessage, Shot};
    pub use crate::{
        AnalysisRequest, Detector, DetectorParams, DetectionRecord, FinalizeRequest,
        OccupancyQuery,
    };
}
