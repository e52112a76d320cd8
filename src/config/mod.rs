//! JSON configuration for detectors and the command-line tool.
pub mod detector;
pub mod list;
pub mod tool;

pub use detector::{DetectorConfig, RoiConfig};
pub use list::parse_number_list;
pub use tool::{load_config, ToolConfig, ToolOutputConfig};
