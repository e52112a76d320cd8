//! Several detectors fed from the same acquisition stream.
//!
//! Each detector keeps its private series; the bank only fans frames out and
//! collects owned results, so the rayon workers never share mutable state.
use super::pipeline::{Detector, DetectorSnapshot, FinalizeRequest};
use super::record::DetectionRecord;
use crate::error::{DetectionError, Result};
use crate::shots::{FrameMessage, Shot};
use log::{debug, warn};
use rayon::prelude::*;

#[derive(Default)]
pub struct DetectorBank {
    detectors: Vec<Detector>,
}

impl DetectorBank {
    pub fn new(detectors: Vec<Detector>) -> Self {
        Self { detectors }
    }

    pub fn push(&mut self, detector: Detector) {
        self.detectors.push(detector);
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Detector> {
        self.detectors.get(index)
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    /// Integrate one frame in every detector (all ROIs of one image).
    pub fn ingest(&self, message: &FrameMessage) -> Vec<Result<Shot>> {
        debug!(
            "DetectorBank::ingest shot={} detectors={}",
            message.shot_id,
            self.detectors.len()
        );
        self.detectors
            .par_iter()
            .map(|d| d.ingest(message))
            .collect()
    }

    /// Integrate `messages[i]` in detector `i` (one image per detector).
    pub fn ingest_each(&self, messages: &[FrameMessage]) -> Result<Vec<Result<Shot>>> {
        if messages.len() != self.detectors.len() {
            return Err(DetectionError::InsufficientData {
                stage: "bank ingest",
                found: messages.len(),
                minimum: self.detectors.len(),
            });
        }
        Ok(self
            .detectors
            .par_iter()
            .zip(messages.par_iter())
            .map(|(d, m)| d.ingest(m))
            .collect())
    }

    /// Finalize every detector with the same request; failures are logged and
    /// returned in place.
    pub fn finalize_all(&self, request: &FinalizeRequest) -> Vec<Result<DetectionRecord>> {
        self.detectors
            .par_iter()
            .map(|d| {
                let res = d.finalize(request);
                if let Err(err) = &res {
                    warn!("DetectorBank::finalize_all detector {}: {err}", d.id());
                }
                res
            })
            .collect()
    }

    pub fn snapshots(&self) -> Vec<DetectorSnapshot> {
        self.detectors.iter().map(Detector::snapshot).collect()
    }

    /// Start a new epoch everywhere.
    pub fn reset(&self) {
        self.detectors.par_iter().for_each(|d| {
            d.reset();
        });
    }
}
