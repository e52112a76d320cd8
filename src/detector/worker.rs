//! One detector driven from its own thread.
//!
//! Callers talk to the worker through a command channel. Frames are fire and
//! forget; every other command carries a reply channel and blocks the caller
//! until the worker has answered, so requests on one worker are applied in
//! the order they were sent.
use super::convergence::AnalysisOutcome;
use super::pipeline::{AnalysisRequest, Detector, DetectorSnapshot, FinalizeRequest};
use super::record::DetectionRecord;
use crate::error::{DetectionError, Result};
use crate::shots::FrameMessage;
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, warn};
use std::thread::{self, JoinHandle};

enum Command {
    Ingest(FrameMessage),
    Analyse {
        request: AnalysisRequest,
        reply: Sender<Result<AnalysisOutcome>>,
    },
    Finalize {
        request: FinalizeRequest,
        reply: Sender<Result<DetectionRecord>>,
    },
    Snapshot {
        reply: Sender<DetectorSnapshot>,
    },
    Reset {
        reply: Sender<u64>,
    },
    Shutdown,
}

pub struct DetectorWorker {
    id: usize,
    commands: Sender<Command>,
    handle: Option<JoinHandle<Detector>>,
}

impl DetectorWorker {
    /// Move `detector` onto a new thread named `detector-<id>`.
    pub fn spawn(detector: Detector) -> Result<Self> {
        let id = detector.id();
        let (commands, inbox) = channel::unbounded();
        let handle = thread::Builder::new()
            .name(format!("detector-{id}"))
            .spawn(move || run(detector, inbox))
            .map_err(|e| DetectionError::Worker(format!("failed to spawn detector-{id}: {e}")))?;
        debug!("DetectorWorker::spawn detector-{id}");
        Ok(Self {
            id,
            commands,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| DetectionError::Worker(format!("detector-{} has stopped", self.id)))
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (reply, answer) = channel::bounded(1);
        self.send(make(reply))?;
        answer
            .recv()
            .map_err(|_| DetectionError::Worker(format!("detector-{} dropped a reply", self.id)))
    }

    /// Queue a frame. Integration errors are logged on the worker thread.
    pub fn ingest(&self, message: FrameMessage) -> Result<()> {
        self.send(Command::Ingest(message))
    }

    pub fn analyse(&self, request: AnalysisRequest) -> Result<AnalysisOutcome> {
        self.request(|reply| Command::Analyse { request, reply })?
    }

    pub fn finalize(&self, request: FinalizeRequest) -> Result<DetectionRecord> {
        self.request(|reply| Command::Finalize { request, reply })?
    }

    pub fn snapshot(&self) -> Result<DetectorSnapshot> {
        self.request(|reply| Command::Snapshot { reply })
    }

    /// Start a new epoch; returns its number.
    pub fn reset(&self) -> Result<u64> {
        self.request(|reply| Command::Reset { reply })
    }

    /// Stop the thread after the queued commands and hand the detector back.
    pub fn shutdown(mut self) -> Result<Detector> {
        // Ignore a closed channel: the thread is gone and join reports why.
        let _ = self.commands.send(Command::Shutdown);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DetectionError::Worker(format!("detector-{} already joined", self.id)))?;
        handle
            .join()
            .map_err(|_| DetectionError::Worker(format!("detector-{} panicked", self.id)))
    }
}

impl Drop for DetectorWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.commands.send(Command::Shutdown);
            let _ = handle.join();
        }
    }
}

fn run(detector: Detector, inbox: Receiver<Command>) -> Detector {
    for command in inbox.iter() {
        // A caller that gave up waiting drops its receiver; nothing to do then.
        match command {
            Command::Ingest(message) => {
                if let Err(err) = detector.ingest(&message) {
                    warn!("detector-{} shot {}: {err}", detector.id(), message.shot_id);
                }
            }
            Command::Analyse { request, reply } => {
                let _ = reply.send(detector.analyse(&request));
            }
            Command::Finalize { request, reply } => {
                let _ = reply.send(detector.finalize(&request));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(detector.snapshot());
            }
            Command::Reset { reply } => {
                let _ = reply.send(detector.reset());
            }
            Command::Shutdown => break,
        }
    }
    debug!("detector-{} worker stopped", detector.id());
    detector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::params::DetectorParams;
    use crate::roi::Roi;
    use nalgebra::DMatrix;

    fn worker() -> DetectorWorker {
        let roi = Roi::rect(3, (3, 3), (1, 1), (1, 1)).expect("fits");
        DetectorWorker::spawn(Detector::new(3, DetectorParams::default(), roi)).expect("spawn")
    }

    fn message(shot_id: u64, value: f64) -> FrameMessage {
        let mut frame = DMatrix::<f64>::zeros(3, 3);
        frame[(1, 1)] = value;
        FrameMessage {
            shot_id,
            frame,
            bias: 0.0,
        }
    }

    #[test]
    fn commands_apply_in_order() {
        let w = worker();
        for id in 0..4 {
            w.ingest(message(id, id as f64)).expect("running");
        }
        let snap = w.snapshot().expect("running");
        assert_eq!(snap.detector_id, 3);
        assert_eq!(snap.series.counts(), vec![0.0, 1.0, 2.0, 3.0]);
        let epoch = w.reset().expect("running");
        assert_eq!(epoch, snap.series.epoch + 1);
        assert!(w.snapshot().expect("running").series.is_empty());
    }

    #[test]
    fn mismatched_frame_is_skipped() {
        let w = worker();
        w.ingest(FrameMessage {
            shot_id: 0,
            frame: DMatrix::zeros(2, 2),
            bias: 0.0,
        })
        .expect("running");
        w.ingest(message(1, 5.0)).expect("running");
        let detector = w.shutdown().expect("joined");
        assert_eq!(detector.series().counts(), vec![5.0]);
    }

    #[test]
    fn finalize_on_empty_series_reports_error() {
        let w = worker();
        assert!(w.finalize(FinalizeRequest::new(0.0)).is_err());
        assert!(w.analyse(AnalysisRequest::default()).is_err());
    }
}
