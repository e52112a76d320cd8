mod common;

use common::synthetic::{bimodal_counts, detector, ingest_counts};
use common::init_logging;
use occupancy_detector::detector::Column;
use occupancy_detector::{DetectionError, DetectorParams, FinalizeRequest};
use std::fs;

fn detector_with_log() -> occupancy_detector::Detector {
    let det = detector(0, DetectorParams::default());
    for (epoch, uv) in [2.0, 0.5, 1.0].into_iter().enumerate() {
        let samples = bimodal_counts(epoch as u64, (150, 80.0, 8.0), (100, 260.0, 15.0));
        ingest_counts(&det, 1000 * epoch as u64, samples.into_iter().map(|(_, c)| c));
        det.finalize(&FinalizeRequest::new(uv)).expect("non-empty epoch");
    }
    det
}

#[test]
fn record_log_reloads_into_a_fresh_detector() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("logs").join("roi0.csv");
    let det = detector_with_log();
    det.save_log(&path).expect("writable");

    let text = fs::read_to_string(&path).expect("written");
    let header = text.lines().nth(2).expect("three header rows");
    assert!(header.starts_with("# File ID,Start file #,End file #"));
    assert!(header.ends_with("Threshold,Include"));

    let fresh = detector(0, DetectorParams::default());
    assert_eq!(fresh.load_log(&path).expect("readable"), 3);
    assert_eq!(fresh.records(), det.records());
    let ids: Vec<u64> = fresh.records().iter().map(|r| r.file_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);

    fresh.sort_log_by_user_variable();
    let order: Vec<u64> = fresh.records().iter().map(|r| r.file_id).collect();
    assert_eq!(order, vec![1, 2, 0]);
}

#[test]
fn missing_column_loads_as_zero() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("roi0.csv");
    let det = detector_with_log();
    det.save_log(&path).expect("writable");

    // Drop the fidelity column from every row.
    let text = fs::read_to_string(&path).expect("written");
    let header = text.lines().nth(2).expect("header");
    let names: Vec<&str> = header.trim_start_matches("# ").split(',').collect();
    let drop = names
        .iter()
        .position(|n| *n == Column::Fidelity.name())
        .expect("fidelity column");
    let stripped: Vec<String> = text
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i < 2 {
                return line.to_string();
            }
            let body = line.trim_start_matches("# ");
            let mut cells: Vec<&str> = body.split(',').collect();
            cells.remove(drop);
            let joined = cells.join(",");
            if i == 2 {
                format!("# {joined}")
            } else {
                joined
            }
        })
        .collect();
    fs::write(&path, stripped.join("\n")).expect("rewrite");

    let fresh = detector(0, DetectorParams::default());
    fresh.load_log(&path).expect("readable");
    let original = det.records();
    for (loaded, original) in fresh.records().iter().zip(&original) {
        assert_eq!(loaded.fidelity, 0.0);
        assert_eq!(loaded.fidelity_error, original.fidelity_error);
        assert_eq!(loaded.loading_probability, original.loading_probability);
    }
}

#[test]
fn denied_write_keeps_the_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("not_a_dir");
    fs::write(&blocker, "occupied").expect("write blocker");
    let det = detector_with_log();

    let err = det
        .save_log(&blocker.join("roi0.csv"))
        .expect_err("parent is a file");
    assert!(matches!(err, DetectionError::PersistenceDenied { .. }));
    assert_eq!(det.records().len(), 3);

    let fallback = dir.path().join("roi0.csv");
    det.save_log(&fallback).expect("retry elsewhere");
}

#[test]
fn shot_table_restores_the_series() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("epoch.csv");
    let det = detector(0, DetectorParams::default());
    ingest_counts(&det, 40, [12.0, 250.5, 13.25, 260.0]);
    det.set_include(42, false);
    det.save_shots(&path).expect("writable");

    let fresh = detector(0, DetectorParams::default());
    assert_eq!(fresh.load_shots(&path).expect("readable"), 4);
    assert_eq!(fresh.series().shots, det.series().shots);
    assert_eq!(fresh.series().counts(), vec![12.0, 250.5, 260.0]);
}
