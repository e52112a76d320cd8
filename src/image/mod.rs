//! Frame representation and file I/O.
pub mod io;

pub use io::{list_frames, load_frame, save_frame_u16, write_json_file};

/// A camera frame: rows are image y, columns image x, values raw counts.
pub type Frame = nalgebra::DMatrix<f64>;
