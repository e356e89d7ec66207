use anyhow::{Context, Result};
use chrono::Utc;
use std::thread;

use super::calibration::CalibrationStore;
use super::layout::{default_qwerty_layout, CalibrationMap, ReservedRegion};
use super::process::{ensure_running, KeyboardProcess};
use super::state::KeyboardStatus;
use super::KeyboardError;
use crate::input::PointerHandle;
use crate::settings::KeyboardSettings;
use crate::{log_debug, log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;

const SHIFT: &str = "shift";
const SPACE: &str = "space";
const ENTER: &str = "enter";
const BACKSPACE: &str = "backspace";

/// Outcome of one `type_text` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypingReport {
    /// Characters that were clicked in.
    pub typed: usize,
    /// Characters with no key on the keyboard, in input order.
    pub skipped: Vec<char>,
    pub clicks: usize,
}

/// Key labels to click for `text`, plus the characters that cannot be typed.
///
/// Uppercase letters become `shift, letter, shift`: the on-screen shift is a
/// toggle, so the second press turns it off again.
pub fn plan_keystrokes(text: &str, map: &CalibrationMap) -> (Vec<String>, TypingReport) {
    let mut labels = Vec::new();
    let mut report = TypingReport::default();

    for ch in text.chars() {
        if ch == ' ' {
            labels.push(SPACE.to_string());
            report.typed += 1;
            continue;
        }

        let lower: String = ch.to_lowercase().collect();
        if !map.contains(&lower) {
            report.skipped.push(ch);
            continue;
        }

        if ch.is_uppercase() {
            labels.push(SHIFT.to_string());
            labels.push(lower);
            labels.push(SHIFT.to_string());
        } else {
            labels.push(lower);
        }
        report.typed += 1;
    }

    report.clicks = labels.len();
    (labels, report)
}

/// Types through the on-screen keyboard by clicking its keys.
///
/// The controller owns the keyboard process for its whole life and closes it
/// when dropped, whichever way the session ends.
pub struct VirtualKeyboardController {
    process: Box<dyn KeyboardProcess>,
    store: CalibrationStore,
    map: CalibrationMap,
    pointer: PointerHandle,
    settings: KeyboardSettings,
}

impl VirtualKeyboardController {
    /// Loads whatever calibration is on disk; an absent or broken file leaves
    /// the controller uncalibrated.
    pub fn new(
        process: Box<dyn KeyboardProcess>,
        store: CalibrationStore,
        pointer: PointerHandle,
        settings: KeyboardSettings,
    ) -> Self {
        let map = store.load();
        Self {
            process,
            store,
            map,
            pointer,
            settings,
        }
    }

    pub fn status(&mut self) -> KeyboardStatus {
        KeyboardStatus::from_parts(self.process.is_running(), self.map.is_calibrated())
    }

    /// Validates the current map every time; nothing is cached.
    pub fn is_calibrated(&self) -> bool {
        self.map.is_calibrated()
    }

    pub fn calibration(&self) -> &CalibrationMap {
        &self.map
    }

    pub fn reserved_region(&self) -> Option<ReservedRegion> {
        self.map.reserved_region
    }

    /// Builds, validates and persists a fresh map. Without `force` a map that
    /// already validates is kept as is.
    ///
    /// The in-memory map is only replaced once the new one is on disk.
    pub fn calibrate(&mut self, force: bool) -> Result<()> {
        if !force && self.map.is_calibrated() {
            log_info!("already calibrated (force to recalibrate)");
            return Ok(());
        }

        ensure_running(self.process.as_mut(), self.settings.launch_wait())?;

        log_info!("calibrating on-screen keyboard");
        let resolution = self.settings.reference_resolution;
        let mut map = default_qwerty_layout().scaled_to(resolution);
        map.reserved_region = Some(ReservedRegion::docked_bottom(resolution));
        map.calibrated_at = Some(Utc::now());

        let missing = map.missing_required();
        if !missing.is_empty() {
            log_error!("calibration is missing {}", missing.join(", "));
            return Err(KeyboardError::Calibration { missing }.into());
        }

        self.store
            .save(&map)
            .context("failed to persist calibration")?;
        self.map = map;
        log_info!("calibration complete ({} keys)", self.map.len());
        Ok(())
    }

    /// Types `text` one click at a time. Characters without a key are skipped
    /// and listed in the report; only launch and calibration problems fail
    /// the call, and then nothing is typed.
    pub fn type_text(&mut self, text: &str) -> Result<TypingReport> {
        self.ready_to_type()?;

        let (labels, report) = plan_keystrokes(text, &self.map);
        for ch in &report.skipped {
            log_warn!("no key for {ch:?}, skipping");
        }

        log_info!("typing {} chars ({} clicks)", text.chars().count(), labels.len());
        for label in &labels {
            self.click_key(label)?;
        }

        Ok(report)
    }

    pub fn backspace(&mut self, count: usize) -> Result<()> {
        self.ready_to_type()?;
        for _ in 0..count {
            self.click_key(BACKSPACE)?;
        }
        Ok(())
    }

    pub fn press_enter(&mut self) -> Result<()> {
        self.ready_to_type()?;
        self.click_key(ENTER)
    }

    /// Empties a text field: triple click at `(x, y)` selects its contents,
    /// one backspace removes them.
    pub fn clear_field(&mut self, x: i32, y: i32) -> Result<()> {
        self.ready_to_type()?;
        self.pointer
            .borrow_mut()
            .click_at(x, y, 3)
            .with_context(|| format!("failed to select field at ({x}, {y})"))?;
        thread::sleep(self.settings.key_delay() * 2);
        self.click_key(BACKSPACE)?;
        log_debug!("cleared field at ({x}, {y})");
        Ok(())
    }

    /// Stops the keyboard program now rather than at drop.
    pub fn close(&mut self) -> Result<bool> {
        self.process.close()
    }

    /// Gate in front of every typing operation. A stopped keyboard gets one
    /// relaunch; an incomplete map refuses outright.
    fn ready_to_type(&mut self) -> Result<()> {
        if !self.process.is_running() {
            log_warn!("on-screen keyboard not running, relaunching");
            ensure_running(self.process.as_mut(), self.settings.launch_wait())?;
        }

        let missing = self.map.missing_required();
        if !missing.is_empty() {
            log_error!("refusing to type: keyboard not calibrated");
            return Err(KeyboardError::Calibration { missing }.into());
        }
        Ok(())
    }

    fn click_key(&mut self, label: &str) -> Result<()> {
        let (x, y) = self
            .map
            .get(label)
            .map(|key| key.center())
            .with_context(|| format!("key '{label}' not in calibration"))?;

        self.pointer
            .borrow_mut()
            .click_at(x, y, 1)
            .with_context(|| format!("failed to click key '{label}'"))?;
        thread::sleep(self.settings.key_delay());

        log_debug!("clicked '{label}' at ({x}, {y})");
        Ok(())
    }
}

impl Drop for VirtualKeyboardController {
    fn drop(&mut self) {
        if let Err(err) = self.process.close() {
            log_warn!("failed to close on-screen keyboard: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{PointerEvent, RecordingPointer};
    use crate::keyboard::process::scripted::ScriptedProcess;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        pointer: Rc<RefCell<RecordingPointer>>,
        process: ScriptedProcess,
        controller: VirtualKeyboardController,
    }

    fn fixture_with(process: ScriptedProcess, map: Option<CalibrationMap>) -> Fixture {
        let dir = tempdir().expect("tempdir");
        let settings = KeyboardSettings {
            key_delay_ms: 0,
            launch_wait_ms: 0,
            calibration_path: dir.path().join("osk.json"),
            ..KeyboardSettings::default()
        };
        let store = CalibrationStore::new(settings.calibration_path.clone());
        if let Some(map) = map {
            store.save(&map).expect("seed calibration");
        }

        let pointer = Rc::new(RefCell::new(RecordingPointer::new()));
        let controller = VirtualKeyboardController::new(
            Box::new(process.clone()),
            store,
            pointer.clone(),
            settings,
        );
        Fixture {
            _dir: dir,
            pointer,
            process,
            controller,
        }
    }

    fn calibrated() -> Fixture {
        fixture_with(ScriptedProcess::running(), Some(default_qwerty_layout()))
    }

    fn key(label: &str) -> (i32, i32) {
        default_qwerty_layout()
            .get(label)
            .map(|key| key.center())
            .expect("key in layout")
    }

    #[test]
    fn uppercase_uses_shift_toggle() {
        let mut fx = calibrated();
        let report = fx.controller.type_text("Ab").expect("type");

        assert_eq!(
            fx.pointer.borrow().clicks(),
            vec![key("shift"), key("a"), key("shift"), key("b")]
        );
        assert_eq!(report.clicks, 4);
        assert_eq!(report.typed, 2);
    }

    #[test]
    fn space_and_digits_are_single_clicks() {
        let mut fx = calibrated();
        fx.controller.type_text("a 1").expect("type");

        assert_eq!(
            fx.pointer.borrow().clicks(),
            vec![key("a"), key("space"), key("1")]
        );
        assert!(fx
            .pointer
            .borrow()
            .events()
            .iter()
            .all(|event| matches!(event, PointerEvent::Click { clicks: 1, .. })));
    }

    #[test]
    fn unmapped_characters_are_skipped() {
        let mut fx = calibrated();
        let report = fx.controller.type_text("hi! é?").expect("type");

        assert_eq!(report.skipped, vec!['!', 'é', '?']);
        assert_eq!(report.typed, 3);
        assert_eq!(
            fx.pointer.borrow().clicks(),
            vec![key("h"), key("i"), key("space")]
        );
    }

    #[test]
    fn uncalibrated_map_refuses_to_type() {
        let mut map = default_qwerty_layout();
        map.remove("space");
        let mut fx = fixture_with(ScriptedProcess::running(), Some(map));

        assert_eq!(fx.controller.status(), KeyboardStatus::Running);
        let err = fx.controller.type_text("abc").expect_err("refused");
        assert!(matches!(
            err.downcast_ref::<KeyboardError>(),
            Some(KeyboardError::Calibration { missing }) if missing == &vec!["space".to_string()]
        ));
        assert!(fx.pointer.borrow().events().is_empty());
    }

    #[test]
    fn stopped_keyboard_is_relaunched_before_typing() {
        let mut fx = fixture_with(ScriptedProcess::default(), Some(default_qwerty_layout()));
        assert_eq!(fx.controller.status(), KeyboardStatus::NotRunning);

        fx.controller.type_text("a").expect("type");
        assert_eq!(fx.process.log.borrow().spawns, 1);
        assert_eq!(fx.controller.status(), KeyboardStatus::Calibrated);
    }

    #[test]
    fn failed_relaunch_fails_closed() {
        let mut fx = fixture_with(ScriptedProcess::never_starts(), Some(default_qwerty_layout()));

        let err = fx.controller.type_text("abc").expect_err("launch fails");
        assert!(matches!(
            err.downcast_ref::<KeyboardError>(),
            Some(KeyboardError::Launch(_))
        ));
        assert!(fx.pointer.borrow().events().is_empty());
    }

    #[test]
    fn calibrate_builds_and_persists_map() {
        let mut fx = fixture_with(ScriptedProcess::default(), None);
        assert!(!fx.controller.is_calibrated());

        fx.controller.calibrate(false).expect("calibrate");
        assert!(fx.controller.is_calibrated());
        assert_eq!(fx.controller.status(), KeyboardStatus::Calibrated);
        assert_eq!(
            fx.controller.reserved_region(),
            Some(ReservedRegion::new(0, 810, 1000, 1080))
        );

        let reloaded = CalibrationStore::new(fx._dir.path().join("osk.json")).load();
        assert!(reloaded.is_calibrated());
    }

    #[test]
    fn invalid_stored_map_stays_uncalibrated_when_launch_fails() {
        let mut map = default_qwerty_layout();
        map.remove("space");
        let mut fx = fixture_with(ScriptedProcess::never_starts(), Some(map));

        assert!(!fx.controller.is_calibrated());
        assert!(fx.controller.calibrate(false).is_err());
        assert!(!fx.controller.is_calibrated());
    }

    #[test]
    fn stored_map_missing_space_is_rebuilt_without_force() {
        let mut map = default_qwerty_layout();
        map.remove("space");
        let mut fx = fixture_with(ScriptedProcess::running(), Some(map));
        assert!(!fx.controller.is_calibrated());

        fx.controller.calibrate(false).expect("rebuilt");
        assert!(fx.controller.is_calibrated());
        assert_eq!(
            fx.controller.calibration().get("space").map(|k| k.center()),
            Some(key("space"))
        );
        assert_eq!(fx.process.log.borrow().spawns, 0);

        let reloaded = CalibrationStore::new(fx._dir.path().join("osk.json")).load();
        assert!(reloaded.contains("space"));
    }

    #[test]
    fn calibrate_without_force_keeps_valid_map() {
        let mut map = default_qwerty_layout();
        map.insert(crate::keyboard::KeyPosition::new("a", 1, 1));
        let mut fx = fixture_with(ScriptedProcess::running(), Some(map));

        fx.controller.calibrate(false).expect("noop");
        assert_eq!(fx.controller.calibration().get("a").map(|k| k.center()), Some((1, 1)));

        fx.controller.calibrate(true).expect("forced");
        assert_eq!(fx.controller.calibration().get("a").map(|k| k.center()), Some(key("a")));
    }

    #[test]
    fn backspace_enter_and_clear_field() {
        let mut fx = calibrated();
        fx.controller.backspace(2).expect("backspace");
        fx.controller.press_enter().expect("enter");
        fx.controller.clear_field(300, 40).expect("clear");

        assert_eq!(
            fx.pointer.borrow().events(),
            &[
                PointerEvent::Click { x: 900, y: 830, clicks: 1 },
                PointerEvent::Click { x: 900, y: 830, clicks: 1 },
                PointerEvent::Click { x: 920, y: 950, clicks: 1 },
                PointerEvent::Click { x: 300, y: 40, clicks: 3 },
                PointerEvent::Click { x: 900, y: 830, clicks: 1 },
            ]
        );
    }

    #[test]
    fn dropping_controller_closes_keyboard() {
        let fx = calibrated();
        let log = fx.process.log.clone();
        drop(fx);

        assert_eq!(log.borrow().closes, 1);
        assert!(!log.borrow().running);
    }
}
