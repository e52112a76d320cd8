use occupancy_detector::image::Frame;
use occupancy_detector::roi::Roi;
use occupancy_detector::shots::FrameMessage;
use occupancy_detector::{Detector, DetectorParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Camera geometry shared by the synthetic detectors.
pub const SHAPE: (usize, usize) = (5, 5);
pub const CENTRE: (usize, usize) = (2, 2);
pub const BIAS: f64 = 697.0;

/// Two Gaussian populations with the loaded/empty truth of every sample.
///
/// Samples are interleaved at random, so acquisition order carries no
/// information about the population.
pub fn bimodal_counts(
    seed: u64,
    (n0, mu0, sigma0): (usize, f64, f64),
    (n1, mu1, sigma1): (usize, f64, f64),
) -> Vec<(bool, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let empty = Normal::new(mu0, sigma0).expect("valid background");
    let loaded = Normal::new(mu1, sigma1).expect("valid signal");
    let (mut left0, mut left1) = (n0, n1);
    let mut out = Vec::with_capacity(n0 + n1);
    while left0 + left1 > 0 {
        let pick_loaded = rng.gen_range(0..left0 + left1) >= left0;
        if pick_loaded {
            out.push((true, loaded.sample(&mut rng)));
            left1 -= 1;
        } else {
            out.push((false, empty.sample(&mut rng)));
            left0 -= 1;
        }
    }
    out
}

/// Flat frame at `BIAS` with `count` added to the centre pixel.
pub fn frame_with_count(count: f64) -> Frame {
    let mut frame = Frame::from_element(SHAPE.0, SHAPE.1, BIAS);
    frame[(CENTRE.1, CENTRE.0)] += count;
    frame
}

/// Single-pixel detector on the synthetic camera.
pub fn detector(id: usize, params: DetectorParams) -> Detector {
    let roi = Roi::rect(id, SHAPE, CENTRE, (1, 1)).expect("ROI fits the camera");
    Detector::new(id, params, roi)
}

/// Feed `counts` to `detector` as consecutive shots starting at `first_id`.
pub fn ingest_counts(detector: &Detector, first_id: u64, counts: impl IntoIterator<Item = f64>) {
    for (offset, count) in counts.into_iter().enumerate() {
        detector
            .ingest(&FrameMessage {
                shot_id: first_id + offset as u64,
                frame: frame_with_count(count),
                bias: BIAS,
            })
            .expect("frame matches the mask");
    }
}
