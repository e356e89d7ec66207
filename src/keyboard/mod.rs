pub mod calibration;
pub mod controller;
pub mod layout;
pub mod process;
pub mod state;

pub use calibration::CalibrationStore;
pub use controller::{TypingReport, VirtualKeyboardController};
pub use layout::{default_qwerty_layout, CalibrationMap, KeyPosition, ReservedRegion};
pub use process::{KeyboardProcess, SystemKeyboardProcess};
pub use state::KeyboardStatus;

use thiserror::Error;

/// Session-level keyboard failures handed back to the orchestrator.
#[derive(Debug, Error)]
pub enum KeyboardError {
    #[error("on-screen keyboard did not start: {0}")]
    Launch(String),
    #[error("keyboard calibration incomplete, missing: {}", .missing.join(", "))]
    Calibration { missing: Vec<String> },
}
