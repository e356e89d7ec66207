use serde::{Deserialize, Serialize};

/// Where a scroll session stands. Only the scroll engine changes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPosition {
    /// Approximate pixels moved; downward travel counts positive.
    pub total_distance: i64,
    pub scroll_count: u32,
    pub last_frame_signature: Option<String>,
    /// Latched once the view stops changing; cleared only by a reset.
    pub at_bottom: bool,
}

impl ScrollPosition {
    pub fn new() -> Self {
        Self::default()
    }
}
