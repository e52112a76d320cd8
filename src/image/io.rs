//! I/O helpers for camera frames and JSON.
//!
//! - `load_frame`: read a PNG/TIFF into a `rows × cols` matrix of raw counts.
//! - `save_frame_u16`: write a frame as a 16-bit grayscale PNG/TIFF.
//! - `list_frames`: image files of a directory in name order.
//! - `write_json_file`: pretty-print a serializable value to disk.
use super::Frame;
use image::{ImageBuffer, Luma};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: [&str; 3] = ["png", "tif", "tiff"];

/// Load an image from disk as 16-bit grayscale counts.
pub fn load_frame(path: &Path) -> Result<Frame, String> {
    let img = image::open(path)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?
        .into_luma16();
    let (width, height) = (img.width() as usize, img.height() as usize);
    let raw = img.into_raw();
    Ok(Frame::from_fn(height, width, |r, c| raw[r * width + c] as f64))
}

/// Save a frame as 16-bit grayscale, clamping values to `[0, 65535]`.
pub fn save_frame_u16(frame: &Frame, path: &Path) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let (rows, cols) = frame.shape();
    let image: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            let v = frame[(y as usize, x as usize)].round().clamp(0.0, u16::MAX as f64);
            Luma([v as u16])
        });
    image
        .save(path)
        .map_err(|e| format!("Failed to save {}: {e}", path.display()))
}

/// Frame files (`.png`, `.tif`, `.tiff`) directly inside `dir`, sorted by name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries =
        fs::read_dir(dir).map_err(|e| format!("Failed to read {}: {e}", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| format!("Failed to read {}: {e}", dir.display()))?
            .path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && is_frame {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Serialize a value as pretty JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize JSON for {}: {e}", path.display()))?;
    fs::write(path, json).map_err(|e| format!("Failed to write JSON {}: {e}", path.display()))
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
    }
    Ok(())
}
