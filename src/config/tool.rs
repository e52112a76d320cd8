use super::detector::{DetectorConfig, RoiConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration of the `occupancy_tool` binary.
#[derive(Debug, Deserialize)]
pub struct ToolConfig {
    /// Directory of PNG/TIFF frames; file order gives the shot ids.
    pub input_dir: PathBuf,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub roi: RoiConfig,
    /// Sweep value stored with the record.
    #[serde(default)]
    pub user_variable: f64,
    /// Keep the ROI threshold fixed during analysis.
    #[serde(default)]
    pub fix_threshold: bool,
    pub output: ToolOutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct ToolOutputConfig {
    /// Running record log; the new record is appended to it.
    pub log_table: PathBuf,
    #[serde(default)]
    pub shots_table: Option<PathBuf>,
    #[serde(default)]
    pub report_json: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<ToolConfig, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
}
