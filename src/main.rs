use occupancy_detector::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};

const BIAS: f64 = 697.0;
const SHOTS: usize = 400;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    // Demo stub: a 9x9 camera with a 3x3 ROI, ~60 % of shots loaded.
    let roi = Roi::rect(0, (9, 9), (4, 4), (3, 3)).map_err(|e| e.to_string())?;
    let detector = Detector::new(0, DetectorParams::default(), roi);
    let empty = Normal::new(40.0, 12.0).map_err(|e| e.to_string())?;
    let loaded = Normal::new(260.0, 30.0).map_err(|e| e.to_string())?;

    for shot in 0..SHOTS {
        // Scrambled quantiles keep the demo deterministic without an RNG.
        let p = (((shot * 37) % SHOTS) as f64 + 0.5) / SHOTS as f64;
        let count = if (shot * 7) % 10 < 6 {
            loaded.inverse_cdf(p)
        } else {
            empty.inverse_cdf(p)
        };
        let mut frame = Frame::from_element(9, 9, BIAS);
        frame.view_mut((3, 3), (3, 3)).fill(BIAS + count / 9.0);
        detector
            .ingest(&FrameMessage {
                shot_id: shot as u64,
                frame,
                bias: BIAS,
            })
            .map_err(|e| e.to_string())?;
    }

    let record = detector
        .finalize(&FinalizeRequest::new(0.0))
        .map_err(|e| e.to_string())?;
    println!(
        "shots={} threshold={:.1} loading={:.3} (+{:.3}/-{:.3}) fidelity={:.4} include={}",
        record.processed,
        record.threshold,
        record.loading_probability,
        record.loading_upper_error,
        record.loading_lower_error,
        record.fidelity,
        record.include
    );
    Ok(())
}
