use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::capture::SegmentationPolicy;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Identical frames in a row before the view is declared exhausted.
    pub end_of_page_threshold: u32,
    /// Fraction of signature bits that must agree for two frames to count
    /// as the same picture.
    pub similarity_threshold: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            end_of_page_threshold: 3,
            similarity_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollSettings {
    /// Default distance in pixels of a smooth scroll.
    pub step_size: u32,
    pub wait_after_scroll_ms: u64,
    pub max_scrolls_per_page: usize,
    /// Approximate pixels travelled per wheel click, used for distance tracking.
    pub pixels_per_click: i64,
    pub max_capture_failures: u32,
    pub blocks_per_scroll: usize,
    pub detection: DetectionSettings,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            step_size: 800,
            wait_after_scroll_ms: 1500,
            max_scrolls_per_page: 10,
            pixels_per_click: 100,
            max_capture_failures: 3,
            blocks_per_scroll: 3,
            detection: DetectionSettings::default(),
        }
    }
}

impl ScrollSettings {
    pub fn wait_after_scroll(&self) -> Duration {
        Duration::from_millis(self.wait_after_scroll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MouseWheelSettings {
    /// Wheel delta for one scroll-down; negative values move the view down.
    pub scroll_down_clicks: i32,
    pub scroll_to_top_clicks: i32,
    pub scroll_to_top_iterations: u32,
    pub scroll_to_top_pause_ms: u64,
    pub smooth_step_pause_ms: u64,
}

impl Default for MouseWheelSettings {
    fn default() -> Self {
        Self {
            scroll_down_clicks: -3,
            scroll_to_top_clicks: 10,
            scroll_to_top_iterations: 20,
            scroll_to_top_pause_ms: 300,
            smooth_step_pause_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardSettings {
    /// Command used to start the on-screen keyboard.
    pub program: String,
    /// Process name searched for when checking whether the keyboard is up.
    pub process_name: String,
    pub launch_wait_ms: u64,
    pub key_delay_ms: u64,
    pub calibration_path: PathBuf,
    pub reference_resolution: Resolution,
}

impl Default for KeyboardSettings {
    fn default() -> Self {
        Self {
            program: "osk.exe".into(),
            process_name: "osk.exe".into(),
            launch_wait_ms: 2000,
            key_delay_ms: 100,
            calibration_path: PathBuf::from("config/osk_calibration.json"),
            reference_resolution: Resolution::default(),
        }
    }
}

impl KeyboardSettings {
    pub fn key_delay(&self) -> Duration {
        Duration::from_millis(self.key_delay_ms)
    }

    pub fn launch_wait(&self) -> Duration {
        Duration::from_millis(self.launch_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub retention_days: u64,
    pub policy: SegmentationPolicy,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("screenshots"),
            retention_days: 7,
            policy: SegmentationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scroll: ScrollSettings,
    pub mouse_wheel: MouseWheelSettings,
    pub keyboard: KeyboardSettings,
    pub capture: CaptureSettings,
}

impl Settings {
    /// Parses settings, falling back to defaults for anything missing or
    /// unusable. Never fails.
    pub fn from_json(contents: &str) -> Self {
        match serde_json::from_str::<Settings>(contents) {
            Ok(settings) => settings.sanitized(),
            Err(err) => {
                log_warn!("malformed settings, using defaults: {err}");
                Settings::default()
            }
        }
    }

    /// Replaces values the engines cannot work with by their defaults.
    pub fn sanitized(mut self) -> Self {
        let scroll_defaults = ScrollSettings::default();
        let detection = &mut self.scroll.detection;
        if detection.end_of_page_threshold == 0 {
            log_warn!("end_of_page_threshold must be positive, using default");
            detection.end_of_page_threshold = scroll_defaults.detection.end_of_page_threshold;
        }
        if !(0.0..=1.0).contains(&detection.similarity_threshold) {
            log_warn!(
                "similarity_threshold {} outside [0, 1], using default",
                detection.similarity_threshold
            );
            detection.similarity_threshold = scroll_defaults.detection.similarity_threshold;
        }
        if self.scroll.pixels_per_click <= 0 {
            log_warn!("pixels_per_click must be positive, using default");
            self.scroll.pixels_per_click = scroll_defaults.pixels_per_click;
        }
        if self.scroll.blocks_per_scroll == 0 {
            log_warn!("blocks_per_scroll must be positive, using default");
            self.scroll.blocks_per_scroll = scroll_defaults.blocks_per_scroll;
        }
        if self.mouse_wheel.scroll_down_clicks == 0 {
            log_warn!("scroll_down_clicks must be non-zero, using default");
            self.mouse_wheel.scroll_down_clicks = MouseWheelSettings::default().scroll_down_clicks;
        }
        self.capture.policy = self.capture.policy.sanitized();
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: Settings,
}

impl SettingsStore {
    /// Opens the store at `path`. A missing or malformed file yields the
    /// built-in defaults; only unreadable files are reported as errors.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            Settings::from_json(&contents)
        } else {
            log_warn!("settings not found at {}, using defaults", path.display());
            Settings::default()
        };

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.data
    }

    pub fn update(&mut self, settings: Settings) -> Result<()> {
        self.persist(&settings)?;
        self.data = settings;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;
        log_info!("settings written to {}", self.path.display());
        Ok(())
    }

    pub fn reload(&mut self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        self.data = Settings::from_json(&contents);
        Ok(())
    }
}
