use occupancy_detector::config::{load_config, ToolConfig};
use occupancy_detector::diagnostics::{AnalysisReport, InputDescriptor};
use occupancy_detector::image::{list_frames, load_frame, write_json_file};
use occupancy_detector::persist::{self, TableMeta};
use occupancy_detector::shots::FrameMessage;
use occupancy_detector::{AnalysisRequest, Detector, DetectorWorker, FinalizeRequest};
use std::env;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn usage() -> String {
    "Usage: occupancy_tool <config.json>".to_string()
}

fn run() -> Result<(), String> {
    env_logger::init();
    let config_path = env::args().nth(1).ok_or_else(usage)?;
    let config = load_config(Path::new(&config_path))?;

    let paths = list_frames(&config.input_dir)?;
    let Some(first) = paths.first() else {
        return Err(format!("No frames found in {}", config.input_dir.display()));
    };
    let shape = load_frame(first)?.shape();

    let detector = Detector::from_config(0, shape, &config.detector, &config.roi)
        .map_err(|e| e.to_string())?;
    let log_path = &config.output.log_table;
    if log_path.exists() {
        let n = detector.load_log(log_path).map_err(|e| e.to_string())?;
        println!("Loaded {n} records from {}", log_path.display());
    }

    let worker = DetectorWorker::spawn(detector).map_err(|e| e.to_string())?;
    for (shot_id, path) in paths.iter().enumerate() {
        let frame = load_frame(path)?;
        worker
            .ingest(FrameMessage {
                shot_id: shot_id as u64,
                frame,
                bias: config.detector.bias,
            })
            .map_err(|e| e.to_string())?;
    }

    let request = AnalysisRequest {
        strategy: None,
        fix_threshold: config.fix_threshold,
    };
    let outcome = worker.analyse(request).map_err(|e| e.to_string())?;
    let snapshot = worker.snapshot().map_err(|e| e.to_string())?;
    let record = worker
        .finalize(FinalizeRequest {
            user_variable: config.user_variable,
            analysis: request,
            reset: true,
        })
        .map_err(|e| e.to_string())?;
    let detector = worker.shutdown().map_err(|e| e.to_string())?;

    detector.save_log(log_path).map_err(|e| e.to_string())?;
    println!("Record {} appended to {}", record.file_id, log_path.display());

    if let Some(path) = &config.output.shots_table {
        let meta = TableMeta::new(&[
            ("Detector ID", snapshot.detector_id.to_string()),
            ("ROI xc ; yc ; size", snapshot.roi.clone()),
            ("Threshold", snapshot.threshold.to_string()),
        ]);
        persist::save_shots(path, &meta, &snapshot.series.shots, snapshot.threshold)
            .map_err(|e| e.to_string())?;
        println!("Shot table written to {}", path.display());
    }

    if let Some(path) = &config.output.report_json {
        let report = AnalysisReport {
            input: InputDescriptor {
                detector_id: snapshot.detector_id,
                roi: snapshot.roi.clone(),
                image_rows: shape.0,
                image_cols: shape.1,
                epoch: snapshot.series.epoch,
                shots: snapshot.series.len(),
                included: snapshot.series.counts().len(),
            },
            strategy: outcome.strategy,
            histogram: outcome.histogram,
            peaks: outcome.peaks,
            threshold: outcome.threshold,
            fidelity: outcome
                .fidelity
                .is_valid()
                .then_some(outcome.fidelity.value),
            success: outcome.success,
            convergence: outcome.trace,
            timings: outcome.timings,
            record: Some(record.clone()),
        };
        write_json_file(path, &report)?;
        println!("JSON report written to {}", path.display());
    }

    print_summary(&config, &record);
    Ok(())
}

fn print_summary(config: &ToolConfig, record: &occupancy_detector::DetectionRecord) {
    println!("Detection summary ({})", config.input_dir.display());
    println!("  roi: {}", record.roi);
    println!("  processed: {}", record.processed);
    println!("  above : below = {} : {}", record.above, record.below);
    println!(
        "  loading: {:.4} (+{:.4} / -{:.4})",
        record.loading_probability, record.loading_upper_error, record.loading_lower_error
    );
    println!("  threshold: {:.2}", record.threshold);
    println!(
        "  fidelity: {:.5} ± {:.5}  S/N: {:.2}",
        record.fidelity, record.fidelity_error, record.signal_to_noise
    );
    println!("  include: {}", record.include);
}
