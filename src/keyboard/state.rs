use serde::{Deserialize, Serialize};

/// Lifecycle of the on-screen keyboard: `NotRunning -> Running -> Calibrated`.
/// Text is only typed from `Calibrated`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum KeyboardStatus {
    #[default]
    NotRunning,
    Running,
    Calibrated,
}

impl KeyboardStatus {
    pub fn from_parts(running: bool, calibrated: bool) -> Self {
        match (running, calibrated) {
            (false, _) => KeyboardStatus::NotRunning,
            (true, false) => KeyboardStatus::Running,
            (true, true) => KeyboardStatus::Calibrated,
        }
    }

    pub fn can_type(self) -> bool {
        self == KeyboardStatus::Calibrated
    }
}
