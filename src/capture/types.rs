use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Axis-aligned rectangle in screen pixels, right and bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One screen grab. Lives for a single scroll step.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub image: DynamicImage,
    pub captured_at: DateTime<Utc>,
}

impl CaptureFrame {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Sub-rectangle of this frame, clamped to its edges. Keeps the original
    /// capture time.
    pub fn crop(&self, rect: Rect) -> CaptureFrame {
        let left = rect.left.max(0) as u32;
        let top = rect.top.max(0) as u32;
        let width = rect.width().max(0) as u32;
        let height = rect.height().max(0) as u32;
        CaptureFrame {
            image: self.image.crop_imm(left, top, width, height),
            captured_at: self.captured_at,
        }
    }
}

/// A slice of the viewport treated as one piece of content, with estimated
/// click targets inside it. Built once per capture and read-only after.
#[derive(Debug, Clone)]
pub struct ContentBlock {
    bounds: Rect,
    ordinal: usize,
    elements: BTreeMap<String, (i32, i32)>,
    image: DynamicImage,
    captured_at: DateTime<Utc>,
}

impl ContentBlock {
    pub fn new(
        bounds: Rect,
        ordinal: usize,
        elements: BTreeMap<String, (i32, i32)>,
        image: DynamicImage,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            bounds,
            ordinal,
            elements,
            image,
            captured_at,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Position of this block across the whole scroll session.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn elements(&self) -> &BTreeMap<String, (i32, i32)> {
        &self.elements
    }

    /// Screen point to click for `name`, if the policy defines it.
    pub fn element(&self, name: &str) -> Option<(i32, i32)> {
        self.elements.get(name).copied()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// What the scoring model receives for one block: the saved image and the
/// coordinates an actuator would click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSubmission {
    pub image_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub ordinal: usize,
    pub bounds: Rect,
    pub elements: BTreeMap<String, (i32, i32)>,
}
