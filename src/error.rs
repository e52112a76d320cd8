//! Error taxonomy shared by the detection pipeline.
//!
//! Every variant degrades a single shot, histogram or record; none of them is
//! meant to abort an enclosing sweep. Callers log the error and continue.
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by the mask, accumulation, fitting and persistence stages.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// A frame does not match the mask it is integrated against.
    #[error("frame shape {found:?} does not match ROI mask shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// Too few shots, bins or points for the requested step.
    #[error("insufficient data for {stage}: got {found}, need {minimum}")]
    InsufficientData {
        stage: &'static str,
        found: usize,
        minimum: usize,
    },

    /// A fit did not converge or produced non-finite parameters.
    #[error("fit diverged ({strategy}): {reason}")]
    FitDivergence {
        strategy: &'static str,
        reason: String,
    },

    /// The requested ROI geometry does not fit inside the image.
    #[error("ROI centre ({cx}, {cy}) size {width}x{height} exceeds image {rows}x{cols}")]
    RoiBounds {
        cx: usize,
        cy: usize,
        width: usize,
        height: usize,
        rows: usize,
        cols: usize,
    },

    /// Reading or writing a table failed; the in-memory data is untouched.
    #[error("failed to access {}: {source}", path.display())]
    PersistenceDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed text in a persisted table or configuration value.
    #[error("parse error: {0}")]
    Parse(String),

    /// A detector worker thread could not be started or has gone away.
    #[error("detector worker: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, DetectionError>;
