use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use super::layout::{CalibrationMap, KeyPosition, ReservedRegion};
use crate::settings::Resolution;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// On-disk shape of the calibration file.
///
/// `keys` maps a label to `[x, y]` or `[x, y, width, height]`.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    #[serde(default)]
    description: String,
    resolution: String,
    calibrated_at: DateTime<Utc>,
    #[serde(default)]
    reserved_region: Option<ReservedRegion>,
    keys: BTreeMap<String, Vec<i32>>,
}

impl CalibrationFile {
    fn from_map(map: &CalibrationMap) -> Self {
        let keys = map
            .keys()
            .map(|key| (key.label.clone(), vec![key.x, key.y, key.width, key.height]))
            .collect();

        Self {
            description: "On-screen keyboard key centres".into(),
            resolution: map.reference_resolution.unwrap_or_default().to_string(),
            calibrated_at: map.calibrated_at.unwrap_or_else(Utc::now),
            reserved_region: map.reserved_region,
            keys,
        }
    }

    fn into_map(self) -> Result<CalibrationMap> {
        let mut map = CalibrationMap::new();
        for (label, coords) in self.keys {
            let key = match coords.as_slice() {
                [x, y] => KeyPosition::new(&label, *x, *y),
                [x, y, width, height] => KeyPosition::with_size(&label, *x, *y, *width, *height),
                other => bail!("key '{label}' has {} coordinates", other.len()),
            };
            map.insert(key);
        }
        map.reference_resolution = Some(parse_resolution(&self.resolution)?);
        map.calibrated_at = Some(self.calibrated_at);
        map.reserved_region = self.reserved_region;
        Ok(map)
    }
}

fn parse_resolution(tag: &str) -> Result<Resolution> {
    let (width, height) = tag
        .split_once('x')
        .with_context(|| format!("resolution tag '{tag}' is not WIDTHxHEIGHT"))?;
    Ok(Resolution {
        width: width.trim().parse().context("resolution width")?,
        height: height.trim().parse().context("resolution height")?,
    })
}

/// Persists the calibration map between runs.
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted map. An absent or unreadable file gives an empty,
    /// uncalibrated map so startup can continue.
    pub fn load(&self) -> CalibrationMap {
        if !self.path.exists() {
            log_info!("no calibration at {}", self.path.display());
            return CalibrationMap::new();
        }

        match self.read() {
            Ok(map) => {
                log_info!("loaded calibration with {} keys", map.len());
                map
            }
            Err(err) => {
                log_warn!(
                    "ignoring malformed calibration {}: {err:#}",
                    self.path.display()
                );
                CalibrationMap::new()
            }
        }
    }

    fn read(&self) -> Result<CalibrationMap> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read calibration from {}", self.path.display()))?;
        let file: CalibrationFile = serde_json::from_str(&contents)?;
        file.into_map()
    }

    /// Writes the whole map. The new contents go to a sibling file that then
    /// replaces the old one, so readers never see a half-written map.
    pub fn save(&self, map: &CalibrationMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let serialized = serde_json::to_string_pretty(&CalibrationFile::from_map(map))?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serialized)
            .with_context(|| format!("Failed to write calibration to {}", staging.display()))?;
        fs::rename(&staging, &self.path).with_context(|| {
            format!("Failed to move calibration into {}", self.path.display())
        })?;

        log_info!("calibration saved to {}", self.path.display());
        Ok(())
    }
}
