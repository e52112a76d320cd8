mod common;

use common::synthetic::{bimodal_counts, detector, ingest_counts};
use common::init_logging;
use occupancy_detector::fit::FitStrategy;
use occupancy_detector::histogram::Histogram;
use occupancy_detector::{AnalysisRequest, DetectorParams, FinalizeRequest};

const EMPTY: (usize, f64, f64) = (1000, 500.0, 20.0);
const LOADED: (usize, f64, f64) = (1000, 900.0, 25.0);

#[test]
fn threshold_lands_between_population_centres() {
    init_logging();
    let samples = bimodal_counts(7, EMPTY, LOADED);
    for strategy in [FitStrategy::Quick, FitStrategy::DoubleGaussian] {
        let det = detector(0, DetectorParams::default());
        ingest_counts(&det, 0, samples.iter().map(|&(_, c)| c));
        let outcome = det
            .analyse(&AnalysisRequest {
                strategy: Some(strategy),
                fix_threshold: false,
            })
            .expect("enough shots");
        assert!(outcome.success, "{strategy:?} failed");
        assert!(
            outcome.threshold > 500.0 && outcome.threshold < 900.0,
            "{strategy:?} threshold={:.2}",
            outcome.threshold
        );
        assert!(
            outcome.fidelity.value >= 0.99,
            "{strategy:?} fidelity={:.4}",
            outcome.fidelity.value
        );
        assert!(outcome.peaks.background.center < outcome.peaks.signal.center);
        assert_eq!(det.roi().threshold(), outcome.threshold);
    }
}

#[test]
fn labels_match_the_generating_population() {
    init_logging();
    let samples = bimodal_counts(11, EMPTY, LOADED);
    let det = detector(0, DetectorParams::default());
    ingest_counts(&det, 0, samples.iter().map(|&(_, c)| c));
    det.analyse(&AnalysisRequest::default()).expect("enough shots");

    let labels = det.snapshot().occupancy();
    let wrong = samples
        .iter()
        .enumerate()
        .filter(|&(id, &(loaded, _))| labels.label(id as u64) != Some(loaded))
        .count();
    assert!(wrong <= 2, "{wrong} shots mislabelled");
}

#[test]
fn record_reports_balanced_loading() {
    init_logging();
    let samples = bimodal_counts(3, EMPTY, LOADED);
    let det = detector(0, DetectorParams::default());
    ingest_counts(&det, 100, samples.iter().map(|&(_, c)| c));
    let record = det.finalize(&FinalizeRequest::new(1.5)).expect("non-empty epoch");

    assert_eq!(record.processed, 2000);
    assert_eq!(record.above + record.below, 2000);
    assert_eq!((record.start_file, record.end_file), (100, 2099));
    assert!((record.loading_probability - 0.5).abs() < 0.01);
    assert!(record.loading_lower_error > 0.0 && record.loading_upper_error > 0.0);
    assert!(record.include);
    assert!((record.separation - 400.0).abs() < 30.0, "sep={}", record.separation);
    assert!(record.signal_to_noise > 5.0, "snr={}", record.signal_to_noise);
    assert_eq!(record.user_variable, 1.5);
    assert!(det.series().is_empty(), "finalize starts a new epoch");
}

#[test]
fn bias_is_subtracted_before_integration() {
    let det = detector(0, DetectorParams::default());
    ingest_counts(&det, 0, [0.0, 12.5, 300.0]);
    let counts = det.series().counts();
    assert_eq!(counts, vec![0.0, 12.5, 300.0]);
}

#[test]
fn histogram_is_idempotent() {
    let samples = bimodal_counts(5, (200, 50.0, 5.0), (300, 120.0, 9.0));
    let counts: Vec<f64> = samples.iter().map(|&(_, c)| c).collect();
    let first = Histogram::build(&counts, None);
    assert_eq!(first, Histogram::build(&counts, None));
    assert_eq!(first.occupancy.iter().sum::<u64>(), counts.len() as u64);

    let det = detector(0, DetectorParams::default());
    ingest_counts(&det, 0, counts);
    let hist = det.histogram();
    assert_eq!(hist, det.histogram());
    assert_eq!(hist.occupancy.iter().sum::<u64>(), first.occupancy.iter().sum::<u64>());
}

#[test]
fn excluded_shots_leave_the_histogram() {
    let det = detector(0, DetectorParams::default());
    ingest_counts(&det, 0, [10.0, 11.0, 12.0, 400.0]);
    assert!(det.set_include(3, false));
    assert!(!det.set_include(99, false));
    let hist = det.histogram();
    assert_eq!(hist.occupancy.iter().sum::<u64>(), 3);
    let record = det.finalize(&FinalizeRequest::new(0.0)).expect("non-empty epoch");
    assert_eq!(record.processed, 4);
    assert_eq!(record.above + record.below, 3);
}
