use serde::{Deserialize, Serialize};

use super::types::Rect;
use crate::log_warn;

const ENABLE_LOGS: bool = true;

/// Edge of a block an element offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    Top,
    Bottom,
}

/// Fixed offset of a named click target from a block's left edge and from
/// its top or bottom edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementOffset {
    pub name: String,
    pub anchor: Anchor,
    pub dx: i32,
    pub dy: i32,
}

impl ElementOffset {
    pub fn new(name: &str, anchor: Anchor, dx: i32, dy: i32) -> Self {
        Self {
            name: name.into(),
            anchor,
            dx,
            dy,
        }
    }

    pub fn resolve(&self, bounds: Rect) -> (i32, i32) {
        let y = match self.anchor {
            Anchor::Top => bounds.top + self.dy,
            Anchor::Bottom => bounds.bottom + self.dy,
        };
        (bounds.left + self.dx, y)
    }
}

/// Per-source segmentation heuristics. A content source is described by one
/// of these values instead of a specialised engine.
///
/// Blocks are carved at a fixed height and gap; nothing looks at the pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationPolicy {
    pub name: String,
    /// First content row, below the page header.
    pub content_top: i32,
    /// Row content stops at, exclusive.
    pub content_bottom: i32,
    pub block_height: i32,
    pub block_gap: i32,
    pub side_margin: i32,
    pub elements: Vec<ElementOffset>,
}

impl Default for SegmentationPolicy {
    fn default() -> Self {
        Self::feed()
    }
}

impl SegmentationPolicy {
    /// Vertical feed of posts with vote arrows on the left and an action row
    /// along the bottom.
    pub fn feed() -> Self {
        Self {
            name: "feed".into(),
            content_top: 200,
            content_bottom: 900,
            block_height: 250,
            block_gap: 10,
            side_margin: 50,
            elements: vec![
                ElementOffset::new("upvote", Anchor::Top, 30, 50),
                ElementOffset::new("downvote", Anchor::Top, 30, 80),
                ElementOffset::new("comment", Anchor::Bottom, 120, -50),
                ElementOffset::new("share", Anchor::Bottom, 220, -50),
                ElementOffset::new("save", Anchor::Bottom, 320, -50),
            ],
        }
    }

    pub fn sanitized(mut self) -> Self {
        let defaults = Self::feed();
        if self.block_height <= 0 {
            log_warn!("policy {}: block_height must be positive, using default", self.name);
            self.block_height = defaults.block_height;
        }
        if self.block_gap < 0 {
            log_warn!("policy {}: negative block_gap, using default", self.name);
            self.block_gap = defaults.block_gap;
        }
        if self.content_bottom <= self.content_top {
            log_warn!("policy {}: empty content span, using default", self.name);
            self.content_top = defaults.content_top;
            self.content_bottom = defaults.content_bottom;
        }
        self
    }
}
