use anyhow::Result;

use crate::capture::{CaptureEngine, ContentBlock, ScreenSource};
use crate::input::PointerHandle;
use crate::keyboard::{CalibrationStore, KeyboardProcess, VirtualKeyboardController};
use crate::scroll::ScrollEngine;
use crate::settings::Settings;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// One automation run against the physical screen.
///
/// The session owns the only keyboard controller and scroll engine built on
/// its pointer. `PointerHandle` is an `Rc`, so a session stays on the thread
/// that made it; run one session per screen. The on-screen keyboard is closed
/// when the session is dropped.
pub struct AutomationSession {
    keyboard: VirtualKeyboardController,
    scroll: ScrollEngine,
    capture: CaptureEngine,
}

impl AutomationSession {
    /// `scroll_screen` feeds end-of-content detection and the sweep,
    /// `capture_screen` serves direct captures.
    pub fn new(
        settings: &Settings,
        pointer: PointerHandle,
        process: Box<dyn KeyboardProcess>,
        scroll_screen: Box<dyn ScreenSource>,
        capture_screen: Box<dyn ScreenSource>,
    ) -> Self {
        let store = CalibrationStore::new(settings.keyboard.calibration_path.clone());
        let keyboard = VirtualKeyboardController::new(
            process,
            store,
            pointer.clone(),
            settings.keyboard.clone(),
        );
        let scroll = ScrollEngine::new(
            pointer,
            scroll_screen,
            settings.scroll.clone(),
            settings.mouse_wheel.clone(),
        );
        let mut capture = CaptureEngine::new(
            capture_screen,
            settings.capture.policy.clone(),
            settings.capture.output_dir.clone(),
        );
        capture.set_reserved_region(keyboard.reserved_region());

        Self {
            keyboard,
            scroll,
            capture,
        }
    }

    /// Brings the keyboard up, calibrating it when needed, and starts
    /// excluding its region from captures.
    pub fn start(&mut self, force_calibration: bool) -> Result<()> {
        self.keyboard.calibrate(force_calibration)?;
        self.capture
            .set_reserved_region(self.keyboard.reserved_region());
        log_info!("session ready ({:?})", self.keyboard.status());
        Ok(())
    }

    pub fn keyboard(&mut self) -> &mut VirtualKeyboardController {
        &mut self.keyboard
    }

    pub fn scroll(&mut self) -> &mut ScrollEngine {
        &mut self.scroll
    }

    pub fn capture(&mut self) -> &mut CaptureEngine {
        &mut self.capture
    }

    /// Scrolls from a fresh position and segments every frame the scroll
    /// engine accepts. `on_blocks` gets each step's blocks with ordinals
    /// running on from the previous step.
    ///
    /// A frame that cannot be segmented counts as a failed step for that
    /// frame only.
    pub fn sweep<T, F>(&mut self, max_steps: Option<usize>, mut on_blocks: F) -> Vec<T>
    where
        F: FnMut(&CaptureEngine, Vec<ContentBlock>) -> Result<Option<T>>,
    {
        self.scroll.reset();
        let capture = &self.capture;
        let mut next_ordinal = 0;

        let results = self.scroll.scroll_and_capture(
            |frame, _| {
                let blocks = capture.segment_frame(frame, next_ordinal)?;
                next_ordinal += blocks.len();
                on_blocks(capture, blocks)
            },
            max_steps,
        );

        if !self.scroll.position().at_bottom {
            log_warn!("sweep ended before the end of content");
        }
        log_info!(
            "sweep done: {} blocks over {} scrolls",
            next_ordinal,
            self.scroll.position().scroll_count
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::screen::scripted::{banded, ScriptedScreen};
    use crate::input::RecordingPointer;
    use crate::keyboard::process::scripted::ScriptedProcess;
    use crate::keyboard::ReservedRegion;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        pointer: Rc<RefCell<RecordingPointer>>,
        process: ScriptedProcess,
        session: AutomationSession,
    }

    fn fixture(frames: Vec<u32>) -> Fixture {
        let dir = tempdir().expect("tempdir");
        let mut settings = Settings::default();
        settings.scroll.wait_after_scroll_ms = 0;
        settings.keyboard.launch_wait_ms = 0;
        settings.keyboard.key_delay_ms = 0;
        settings.keyboard.calibration_path = dir.path().join("osk.json");
        settings.capture.output_dir = dir.path().join("captures");

        let frames = frames
            .into_iter()
            .map(|shift| Some(banded(1920, 1080, 40, shift)))
            .collect();
        let pointer = Rc::new(RefCell::new(RecordingPointer::new()));
        let process = ScriptedProcess::default();
        let session = AutomationSession::new(
            &settings,
            pointer.clone(),
            Box::new(process.clone()),
            Box::new(ScriptedScreen::new(frames)),
            Box::new(ScriptedScreen::fixed(banded(1920, 1080, 40, 0))),
        );
        Fixture {
            dir,
            pointer,
            process,
            session,
        }
    }

    #[test]
    fn start_launches_calibrates_and_reserves_keyboard() {
        let mut fx = fixture(vec![]);
        fx.session.start(false).expect("start");

        assert_eq!(fx.process.log.borrow().spawns, 1);
        assert!(fx.session.keyboard().is_calibrated());
        assert_eq!(
            fx.session.capture().reserved_region(),
            Some(ReservedRegion::new(0, 810, 1000, 1080))
        );
        assert!(fx.dir.path().join("osk.json").exists());
    }

    #[test]
    fn sweep_numbers_blocks_across_steps() {
        let mut fx = fixture(vec![0, 40, 0]);
        fx.session.start(false).expect("start");

        let batches = fx.session.sweep(Some(10), |_, blocks| {
            Ok(Some(
                blocks.iter().map(|block| block.ordinal()).collect::<Vec<_>>(),
            ))
        });

        // Viewport ends at 810, leaving three blocks per frame.
        assert_eq!(
            batches,
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9, 10, 11]]
        );
        assert!(fx.session.scroll().position().at_bottom);
        assert_eq!(fx.pointer.borrow().scroll_deltas(), vec![-3, -3, -3, -3]);
    }

    #[test]
    fn sweep_blocks_can_be_prepared_for_model() {
        let mut fx = fixture(vec![0, 40]);
        fx.session.start(false).expect("start");

        let submissions = fx.session.sweep(Some(2), |capture, blocks| {
            let first = blocks.first().expect("block");
            capture.prepare_for_model(first).map(Some)
        });

        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[1].ordinal, 3);
        assert!(submissions.iter().all(|s| s.image_path.exists()));
    }

    #[test]
    fn sweep_restarts_from_fresh_position() {
        let mut fx = fixture(vec![0, 40]);
        fx.session.scroll().scroll_down(Some(2)).expect("down");

        fx.session.sweep(Some(1), |_, _| Ok(None::<()>));
        assert_eq!(fx.session.scroll().position().scroll_count, 1);
    }

    #[test]
    fn dropping_session_closes_keyboard() {
        let fx = fixture(vec![]);
        let log = fx.process.log.clone();
        let mut session = fx.session;
        session.start(false).expect("start");
        assert!(log.borrow().running);

        drop(session);
        assert!(!log.borrow().running);
        assert_eq!(log.borrow().closes, 1);
    }
}
