//! On-disk tables: the per-epoch shot table and the per-detector record log.
//!
//! Both use the three-header-row layout of [`table`]. Write failures come
//! back as [`crate::DetectionError::PersistenceDenied`] and never touch the
//! in-memory series or log.
pub mod table;

pub use table::{parse_table, read_table, render_table, write_table, Cell, ColumnType, TableMeta, TableRow};

use crate::detector::record::DetectionRecord;
use crate::error::Result;
use crate::shots::Shot;
use std::path::Path;

/// A shot together with its occupancy label at the threshold in force.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShotRow {
    pub shot: Shot,
    pub occupied: bool,
}

impl ShotRow {
    /// Label `shot` against `threshold` (strictly above means occupied).
    pub fn classify(shot: Shot, threshold: f64) -> Self {
        Self {
            shot,
            occupied: shot.include && shot.count > threshold,
        }
    }
}

const SHOT_COLUMNS: [(&str, ColumnType); 9] = [
    ("File ID", ColumnType::Int),
    ("Counts", ColumnType::Float),
    ("Atom detected", ColumnType::Int),
    ("ROI centre count", ColumnType::Float),
    ("Max xpos", ColumnType::Int),
    ("Max ypos", ColumnType::Int),
    ("Mean bg count", ColumnType::Float),
    ("Bg s.d.", ColumnType::Float),
    ("Include", ColumnType::Bool),
];

impl TableRow for ShotRow {
    fn columns() -> &'static [(&'static str, ColumnType)] {
        &SHOT_COLUMNS
    }

    fn cells(&self) -> Vec<Cell> {
        let s = &self.shot;
        vec![
            Cell::Int(s.id as i64),
            Cell::Float(s.count),
            Cell::Int(i64::from(self.occupied)),
            Cell::Float(s.centre_count),
            Cell::Int(s.max_pixel.0 as i64),
            Cell::Int(s.max_pixel.1 as i64),
            Cell::Float(s.background_mean),
            Cell::Float(s.background_stdev),
            Cell::Bool(s.include),
        ]
    }

    fn from_cells(cells: &[Cell]) -> Self {
        let int = |i: usize| cells.get(i).map_or(0, Cell::as_i64).max(0);
        let float = |i: usize| cells.get(i).map_or(0.0, Cell::as_f64);
        Self {
            shot: Shot {
                id: int(0) as u64,
                count: float(1),
                centre_count: float(3),
                max_pixel: (int(4) as usize, int(5) as usize),
                background_mean: float(6),
                background_stdev: float(7),
                include: cells.get(8).is_some_and(Cell::as_bool),
            },
            occupied: int(2) > 0,
        }
    }
}

/// Write one epoch's shots, labelled at `threshold`.
pub fn save_shots(path: &Path, meta: &TableMeta, shots: &[Shot], threshold: f64) -> Result<()> {
    let rows: Vec<ShotRow> = shots
        .iter()
        .map(|&s| ShotRow::classify(s, threshold))
        .collect();
    write_table(path, meta, &rows)
}

pub fn load_shots(path: &Path) -> Result<(TableMeta, Vec<ShotRow>)> {
    read_table(path)
}

/// Write a detector's record log.
pub fn save_log(path: &Path, meta: &TableMeta, records: &[DetectionRecord]) -> Result<()> {
    write_table(path, meta, records)
}

pub fn load_log(path: &Path) -> Result<(TableMeta, Vec<DetectionRecord>)> {
    read_table(path)
}
