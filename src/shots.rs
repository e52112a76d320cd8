//! Per-frame samples and the series that accumulates them.
//!
//! One [`Shot`] is produced per frame. The series lives behind a single
//! mutex so that `ingest`, `reset` and `snapshot` are atomic with respect to
//! each other; snapshots are owned copies and never observe a half-applied
//! update.
use crate::error::{DetectionError, Result};
use crate::image::Frame;
use crate::roi::Roi;
use log::error;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One frame as delivered by the acquisition side.
#[derive(Clone, Debug)]
pub struct FrameMessage {
    pub shot_id: u64,
    pub frame: Frame,
    /// Offset subtracted from every pixel before integration.
    pub bias: f64,
}

/// Integrated ROI brightness of one frame plus background statistics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: u64,
    /// `Σ (frame − bias) ⊙ mask`.
    pub count: f64,
    /// Bias-subtracted value of the ROI centre pixel.
    pub centre_count: f64,
    /// `(x, y)` of the brightest pixel in the whole frame.
    pub max_pixel: (usize, usize),
    pub background_mean: f64,
    pub background_stdev: f64,
    pub include: bool,
}

impl Shot {
    /// Zero-valued placeholder for a frame that could not be integrated.
    pub fn excluded(id: u64) -> Self {
        Self {
            id,
            count: 0.0,
            centre_count: 0.0,
            max_pixel: (0, 0),
            background_mean: 0.0,
            background_stdev: 0.0,
            include: false,
        }
    }

    /// Integrate `frame` against the ROI mask.
    ///
    /// Background statistics are taken over the complement of the mask,
    /// weighting each pixel by `1 − m`; the deviation uses an `N − 1`
    /// divisor with `N = Σ(1 − m)`.
    pub fn measure(id: u64, frame: &Frame, bias: f64, roi: &Roi) -> Result<Self> {
        let mask = roi.mask();
        if frame.shape() != mask.shape() {
            return Err(DetectionError::ShapeMismatch {
                expected: mask.shape(),
                found: frame.shape(),
            });
        }
        let signal = frame.add_scalar(-bias);
        let count = signal.component_mul(mask).sum();

        let weights = mask.map(|m| (1.0 - m).clamp(0.0, 1.0));
        let n = weights.sum();
        let (background_mean, background_stdev) = if n > 0.0 {
            let mean = signal.component_mul(&weights).sum() / n;
            let ss: f64 = signal
                .iter()
                .zip(weights.iter())
                .map(|(v, w)| w * (v - mean).powi(2))
                .sum();
            let sd = if n > 1.0 { (ss / (n - 1.0)).sqrt() } else { 0.0 };
            (mean, sd)
        } else {
            (0.0, 0.0)
        };

        let (cx, cy) = roi.center();
        let centre_count = signal.get((cy, cx)).copied().unwrap_or(0.0);
        // First maximum in row-major order.
        let (rows, cols) = signal.shape();
        let mut max_pixel = (0, 0);
        let mut best = f64::NEG_INFINITY;
        for r in 0..rows {
            for c in 0..cols {
                if signal[(r, c)] > best {
                    best = signal[(r, c)];
                    max_pixel = (c, r);
                }
            }
        }

        Ok(Self {
            id,
            count,
            centre_count,
            max_pixel,
            background_mean,
            background_stdev,
            include: true,
        })
    }
}

/// Owned copy of a series at one instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotSeries {
    /// Accumulation epoch the shots belong to.
    pub epoch: u64,
    pub shots: Vec<Shot>,
}

impl ShotSeries {
    /// Counts of the included shots, in acquisition order.
    pub fn counts(&self) -> Vec<f64> {
        self.shots
            .iter()
            .filter(|s| s.include)
            .map(|s| s.count)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shots.is_empty()
    }

    /// First and last shot id.
    pub fn id_range(&self) -> Option<(u64, u64)> {
        Some((self.shots.first()?.id, self.shots.last()?.id))
    }
}

#[derive(Debug, Default)]
struct SeriesState {
    epoch: u64,
    shots: Vec<Shot>,
}

/// Ordered, thread-safe shot series of one detector.
#[derive(Debug, Default)]
pub struct Accumulator {
    state: Mutex<SeriesState>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure `message.frame` against `roi` and append the shot.
    ///
    /// A frame whose shape differs from the mask still appends a zeroed,
    /// excluded shot; the mismatch is logged and returned.
    pub fn ingest(&self, message: &FrameMessage, roi: &Roi) -> Result<Shot> {
        let measured = Shot::measure(message.shot_id, &message.frame, message.bias, roi);
        let mut state = self.state.lock();
        match measured {
            Ok(shot) => {
                state.shots.push(shot);
                Ok(shot)
            }
            Err(err) => {
                error!("Accumulator::ingest shot {}: {err}", message.shot_id);
                state.shots.push(Shot::excluded(message.shot_id));
                Err(err)
            }
        }
    }

    /// Append shots that were measured elsewhere, e.g. reloaded from a table.
    pub fn extend(&self, shots: impl IntoIterator<Item = Shot>) {
        self.state.lock().shots.extend(shots);
    }

    /// Change the `include` flag of shot `id`; false when it is not present.
    pub fn set_include(&self, id: u64, include: bool) -> bool {
        let mut state = self.state.lock();
        match state.shots.iter_mut().find(|s| s.id == id) {
            Some(shot) => {
                shot.include = include;
                true
            }
            None => false,
        }
    }

    /// Clear the series and start a new epoch. Returns the new epoch number.
    pub fn reset(&self) -> u64 {
        let mut state = self.state.lock();
        state.shots.clear();
        state.epoch += 1;
        state.epoch
    }

    /// Take the current series and start a new epoch in one step, so no
    /// shot ingested concurrently is lost between the copy and the clear.
    pub fn drain(&self) -> ShotSeries {
        let mut state = self.state.lock();
        let shots = std::mem::take(&mut state.shots);
        let series = ShotSeries {
            epoch: state.epoch,
            shots,
        };
        state.epoch += 1;
        series
    }

    pub fn snapshot(&self) -> ShotSeries {
        let state = self.state.lock();
        ShotSeries {
            epoch: state.epoch,
            shots: state.shots.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().shots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn roi() -> Roi {
        Roi::rect(0, (6, 8), (3, 2), (2, 2)).expect("in bounds")
    }

    fn message(id: u64, frame: Frame) -> FrameMessage {
        FrameMessage {
            shot_id: id,
            frame,
            bias: 100.0,
        }
    }

    #[test]
    fn integrates_bias_subtracted_counts() {
        let mut frame = Frame::from_element(6, 8, 102.0);
        // ROI spans rows 1..3, cols 2..4.
        frame[(1, 2)] = 150.0;
        frame[(2, 3)] = 130.0;
        let shot = Shot::measure(7, &frame, 100.0, &roi()).expect("shapes match");
        assert_eq!(shot.count, 50.0 + 30.0 + 2.0 + 2.0);
        assert_eq!(shot.background_mean, 2.0);
        assert_eq!(shot.background_stdev, 0.0);
        assert_eq!(shot.max_pixel, (2, 1));
        assert_eq!(shot.centre_count, 30.0);
        assert!(shot.include);
    }

    #[test]
    fn background_uses_sample_deviation() {
        let mut frame = Frame::from_element(6, 8, 100.0);
        frame[(5, 7)] = 144.0;
        let shot = Shot::measure(0, &frame, 100.0, &roi()).expect("shapes match");
        let n = 48.0 - 4.0;
        let mean = 44.0 / n;
        let ss = (44.0 - mean) * (44.0 - mean) + (n - 1.0) * mean * mean;
        assert!((shot.background_mean - mean).abs() < 1e-12);
        assert!((shot.background_stdev - (ss / (n - 1.0)).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn shape_mismatch_appends_excluded_shot() {
        let acc = Accumulator::new();
        let roi = roi();
        acc.ingest(&message(1, Frame::from_element(6, 8, 120.0)), &roi)
            .expect("shapes match");
        let err = acc
            .ingest(&message(2, Frame::from_element(5, 5, 120.0)), &roi)
            .unwrap_err();
        assert!(matches!(err, DetectionError::ShapeMismatch { .. }));
        acc.ingest(&message(3, Frame::from_element(6, 8, 120.0)), &roi)
            .expect("shapes match");

        let snap = acc.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.shots[1], Shot::excluded(2));
        assert_eq!(snap.counts().len(), 2);
    }

    #[test]
    fn drain_hands_over_the_epoch() {
        let acc = Accumulator::new();
        let roi = roi();
        for id in 0..3 {
            acc.ingest(&message(id, Frame::from_element(6, 8, 110.0)), &roi)
                .expect("shapes match");
        }
        let taken = acc.drain();
        assert_eq!(taken.epoch, 0);
        assert_eq!(taken.id_range(), Some((0, 2)));
        assert!(acc.is_empty());
        assert_eq!(acc.snapshot().epoch, 1);
    }

    #[test]
    fn reset_is_atomic_with_concurrent_ingest() {
        let acc = Arc::new(Accumulator::new());
        let roi = Arc::new(roi());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let acc = Arc::clone(&acc);
                let roi = Arc::clone(&roi);
                thread::spawn(move || {
                    for i in 0..50 {
                        let msg = message(t * 1000 + i, Frame::from_element(6, 8, 110.0));
                        acc.ingest(&msg, &roi).expect("shapes match");
                    }
                })
            })
            .collect();
        let epoch = acc.reset();
        for w in writers {
            w.join().expect("writer thread");
        }
        let snap = acc.snapshot();
        assert_eq!(snap.epoch, epoch);
        assert!(snap.len() <= 200);
        assert!(snap.shots.iter().all(|s| s.count == 40.0));
    }
}
