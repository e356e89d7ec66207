use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::settings::Resolution;

/// Control keys every usable map must carry, whatever else it contains.
pub const REQUIRED_CONTROL_KEYS: [&str; 4] = ["space", "enter", "backspace", "shift"];

const DEFAULT_KEY_SIZE: i32 = 40;

/// Clickable position of one key. `x`/`y` is the point clicked, the middle of
/// the key; `width`/`height` are nominal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPosition {
    pub label: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl KeyPosition {
    pub fn new(label: &str, x: i32, y: i32) -> Self {
        Self::with_size(label, x, y, DEFAULT_KEY_SIZE, DEFAULT_KEY_SIZE)
    }

    pub fn with_size(label: &str, x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            label: label.to_lowercase(),
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

/// Screen rectangle covered by the on-screen keyboard. Captures stop at its
/// top edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedRegion {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ReservedRegion {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Where the keyboard docks on a screen of `resolution`: the bottom
    /// quarter, 1000 px wide from the left edge.
    pub fn docked_bottom(resolution: Resolution) -> Self {
        let height = resolution.height as i32;
        Self::new(0, height * 3 / 4, 1000, height)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Label to key table plus the metadata written alongside it.
///
/// Labels are stored lowercase; uppercase text is produced through the shift
/// key rather than separate entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationMap {
    keys: HashMap<String, KeyPosition>,
    pub reference_resolution: Option<Resolution>,
    pub calibrated_at: Option<DateTime<Utc>>,
    pub reserved_region: Option<ReservedRegion>,
}

impl CalibrationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: KeyPosition) {
        self.keys.insert(key.label.clone(), key);
    }

    pub fn remove(&mut self, label: &str) -> Option<KeyPosition> {
        self.keys.remove(&label.to_lowercase())
    }

    pub fn get(&self, label: &str) -> Option<&KeyPosition> {
        self.keys.get(label).or_else(|| self.keys.get(&label.to_lowercase()))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyPosition> {
        self.keys.values()
    }

    /// Required labels this map lacks: the control keys first, then letters
    /// and digits.
    pub fn missing_required(&self) -> Vec<String> {
        REQUIRED_CONTROL_KEYS
            .iter()
            .map(|label| label.to_string())
            .chain(('a'..='z').chain('0'..='9').map(String::from))
            .filter(|label| !self.keys.contains_key(label))
            .collect()
    }

    /// Usable for typing: every control key, letter and digit is mapped.
    pub fn is_calibrated(&self) -> bool {
        self.missing_required().is_empty()
    }

    /// Copy of this map with every key moved proportionally from its
    /// reference resolution to `target`.
    pub fn scaled_to(&self, target: Resolution) -> CalibrationMap {
        let source = self.reference_resolution.unwrap_or_default();
        let scale = |value: i32, to: u32, from: u32| -> i32 {
            if from == 0 {
                return value;
            }
            (i64::from(value) * i64::from(to) / i64::from(from)) as i32
        };

        let mut scaled = CalibrationMap {
            keys: HashMap::with_capacity(self.keys.len()),
            reference_resolution: Some(target),
            calibrated_at: self.calibrated_at,
            reserved_region: self.reserved_region,
        };
        for key in self.keys.values() {
            scaled.insert(KeyPosition::with_size(
                &key.label,
                scale(key.x, target.width, source.width),
                scale(key.y, target.height, source.height),
                scale(key.width, target.width, source.width),
                scale(key.height, target.height, source.height),
            ));
        }
        scaled
    }
}

/// Stock QWERTY coordinates of the Windows on-screen keyboard docked at the
/// bottom of a 1920x1080 screen.
pub fn default_qwerty_layout() -> CalibrationMap {
    const ROWS: [(&str, i32, i32, i32); 4] = [
        ("1234567890", 80, 80, 830),
        ("qwertyuiop", 80, 80, 890),
        ("asdfghjkl", 100, 80, 950),
        ("zxcvbnm", 220, 80, 1010),
    ];
    const EXTRAS: [(&str, i32, i32); 9] = [
        ("space", 520, 1070),
        ("backspace", 900, 830),
        ("enter", 920, 950),
        ("shift", 60, 1010),
        (".", 760, 1010),
        (",", 700, 1010),
        ("/", 840, 1010),
        ("-", 880, 830),
        ("'", 820, 950),
    ];

    let mut map = CalibrationMap::new();
    for (row, first_x, pitch, y) in ROWS {
        for (i, ch) in row.chars().enumerate() {
            map.insert(KeyPosition::new(&ch.to_string(), first_x + pitch * i as i32, y));
        }
    }
    // `b`, `n` and `m` sit 20 px left of the row pitch.
    map.insert(KeyPosition::new("b", 520, 1010));
    map.insert(KeyPosition::new("n", 600, 1010));
    map.insert(KeyPosition::new("m", 680, 1010));
    for (label, x, y) in EXTRAS {
        map.insert(KeyPosition::new(label, x, y));
    }
    map.reference_resolution = Some(Resolution::default());
    map
}
