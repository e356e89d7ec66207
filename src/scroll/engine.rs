use anyhow::{bail, Context, Result};
use std::{thread, time::Duration};

use super::signature::{compute_signature, signatures_match};
use super::state::ScrollPosition;
use crate::capture::{CaptureFrame, ScreenSource};
use crate::input::PointerHandle;
use crate::settings::{MouseWheelSettings, ScrollSettings};
use crate::{log_debug, log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Moves the view with wheel events only and decides when an endless view
/// has run out.
///
/// End of content is inferred from the picture: once the same frame comes
/// back `end_of_page_threshold` times in a row the view is taken to be
/// exhausted. A view that is frozen while still loading looks the same, so
/// this can fire early.
pub struct ScrollEngine {
    pointer: PointerHandle,
    screen: Box<dyn ScreenSource>,
    scroll: ScrollSettings,
    wheel: MouseWheelSettings,
    position: ScrollPosition,
    /// Length of the current run of matching frames.
    same_frames: u32,
}

impl ScrollEngine {
    pub fn new(
        pointer: PointerHandle,
        screen: Box<dyn ScreenSource>,
        scroll: ScrollSettings,
        wheel: MouseWheelSettings,
    ) -> Self {
        Self {
            pointer,
            screen,
            scroll,
            wheel,
            position: ScrollPosition::new(),
            same_frames: 0,
        }
    }

    pub fn position(&self) -> &ScrollPosition {
        &self.position
    }

    pub fn settings(&self) -> &ScrollSettings {
        &self.scroll
    }

    /// Scrolls down by `clicks` wheel notches, or the configured amount.
    pub fn scroll_down(&mut self, clicks: Option<i32>) -> Result<()> {
        let clicks = clicks.unwrap_or(self.wheel.scroll_down_clicks).abs();
        self.wheel_by(-clicks)
    }

    pub fn scroll_up(&mut self, clicks: Option<i32>) -> Result<()> {
        let clicks = clicks.unwrap_or(self.wheel.scroll_down_clicks).abs();
        self.wheel_by(clicks)
    }

    /// Sends one wheel delta and books it. Nothing is booked if the pointer
    /// rejects the event.
    fn wheel_by(&mut self, delta: i32) -> Result<()> {
        self.pointer
            .borrow_mut()
            .scroll(delta)
            .with_context(|| format!("wheel delta {delta} failed"))?;

        self.position.scroll_count += 1;
        self.position.total_distance -= i64::from(delta) * self.scroll.pixels_per_click;
        thread::sleep(self.scroll.wait_after_scroll());

        log_debug!(
            "wheel {delta} (count {}, distance {})",
            self.position.scroll_count,
            self.position.total_distance
        );
        Ok(())
    }

    /// Large upward deltas a fixed number of times, then a reset. Does not
    /// look at the screen to see whether the top was reached.
    ///
    /// A rejected delta is logged and the remaining ones are still sent. The
    /// position is reset either way; the call fails if any delta was lost.
    pub fn scroll_to_top(&mut self) -> Result<()> {
        log_info!("scrolling to top");
        let pause = Duration::from_millis(self.wheel.scroll_to_top_pause_ms);
        let mut failed = 0;
        for iteration in 0..self.wheel.scroll_to_top_iterations {
            if let Err(err) = self.scroll_up(Some(self.wheel.scroll_to_top_clicks)) {
                failed += 1;
                log_warn!("scroll to top iteration {iteration} failed: {err:#}");
            }
            thread::sleep(pause);
        }
        self.reset();

        if failed > 0 {
            bail!(
                "{failed} of {} scroll-to-top deltas failed",
                self.wheel.scroll_to_top_iterations
            );
        }
        Ok(())
    }

    /// One configured step down. Returns `false` without scrolling once the
    /// end of content has been detected.
    pub fn scroll_step(&mut self) -> Result<bool> {
        if self.position.at_bottom {
            log_debug!("already at bottom");
            return Ok(false);
        }
        self.scroll_down(None)?;
        Ok(true)
    }

    /// Scrolls roughly `distance` pixels, or `step_size`, in single notches
    /// with a short pause between them, then waits for content as after a
    /// normal scroll.
    ///
    /// The position is only booked once every notch went through.
    pub fn smooth_scroll_down(&mut self, distance: Option<i64>) -> Result<()> {
        let distance = distance.unwrap_or_else(|| i64::from(self.scroll.step_size));
        let steps = distance.abs() / self.scroll.pixels_per_click;
        let pause = Duration::from_millis(self.wheel.smooth_step_pause_ms);
        for step in 0..steps {
            self.pointer
                .borrow_mut()
                .scroll(-1)
                .with_context(|| format!("smooth scroll failed after {step} of {steps} notches"))?;
            thread::sleep(pause);
        }

        let travelled = steps * self.scroll.pixels_per_click;
        self.position.total_distance += travelled;
        self.position.scroll_count += 1;
        thread::sleep(self.scroll.wait_after_scroll());

        log_debug!("smooth scrolled {travelled}px");
        Ok(())
    }

    /// Brings block `index` (counted from the top of the view) roughly into
    /// view, assuming `blocks_per_scroll` blocks pass per scroll step.
    pub fn scroll_to_block(&mut self, index: usize) -> Result<()> {
        let steps = index / self.scroll.blocks_per_scroll.max(1);
        self.scroll_to_top()?;
        for _ in 0..steps {
            self.scroll_down(None)?;
        }
        log_info!("scrolled to about block {index}");
        Ok(())
    }

    /// Feeds one frame to end-of-content detection and returns whether the
    /// view is exhausted.
    ///
    /// A frame matching the previous one extends the current run, any other
    /// frame starts a new run of one. `at_bottom` latches when the run
    /// reaches the threshold and stays set until [`reset`](Self::reset).
    pub fn detect_end_of_content(&mut self, frame: &CaptureFrame) -> bool {
        let signature = compute_signature(&frame.image);
        let similarity = self.scroll.detection.similarity_threshold;

        let same = self
            .position
            .last_frame_signature
            .as_deref()
            .is_some_and(|last| signatures_match(last, &signature, similarity));
        if same {
            self.same_frames += 1;
            log_debug!(
                "same frame ({}/{})",
                self.same_frames,
                self.scroll.detection.end_of_page_threshold
            );
        } else {
            self.same_frames = 1;
        }
        self.position.last_frame_signature = Some(signature);

        if !self.position.at_bottom && self.same_frames >= self.scroll.detection.end_of_page_threshold
        {
            self.position.at_bottom = true;
            log_info!("end of content detected");
        }
        self.position.at_bottom
    }

    /// Main loop. Each step grabs a frame, checks it for end of content,
    /// hands it to `on_step`, then scrolls down. The order matters: the frame
    /// checked is the one taken before the scroll.
    ///
    /// The step that detects the end does not reach `on_step`. A failed grab
    /// skips its step; too many in a row, or any failed scroll, end the loop.
    /// `on_step` errors are logged and the loop carries on.
    pub fn scroll_and_capture<T, F>(&mut self, mut on_step: F, max_steps: Option<usize>) -> Vec<T>
    where
        F: FnMut(&CaptureFrame, usize) -> Result<Option<T>>,
    {
        let max_steps = max_steps.unwrap_or(self.scroll.max_scrolls_per_page);
        let mut results = Vec::new();
        let mut failed_grabs = 0;

        log_info!("scroll and capture (max {max_steps} steps)");
        for step in 0..max_steps {
            let frame = match self.screen.grab() {
                Ok(image) => {
                    failed_grabs = 0;
                    CaptureFrame::new(image)
                }
                Err(err) => {
                    failed_grabs += 1;
                    log_warn!("capture failed at step {step}: {err:#}");
                    if failed_grabs >= self.scroll.max_capture_failures {
                        log_error!("{failed_grabs} captures failed in a row, stopping");
                        break;
                    }
                    continue;
                }
            };

            if self.detect_end_of_content(&frame) {
                log_info!("reached end after {step} steps");
                break;
            }

            match on_step(&frame, step) {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(err) => log_error!("step {step} callback failed: {err:#}"),
            }

            if let Err(err) = self.scroll_down(None) {
                log_warn!("scroll failed, stopping: {err:#}");
                break;
            }
        }

        log_info!("scroll and capture complete: {} results", results.len());
        results
    }

    /// Back to a fresh session: zero distance and count, no signature, not at
    /// bottom. Valid in any state.
    pub fn reset(&mut self) {
        self.position = ScrollPosition::new();
        self.same_frames = 0;
        log_debug!("scroll position reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::screen::scripted::{banded, ScriptedScreen};
    use crate::input::RecordingPointer;
    use image::DynamicImage;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn quiet_settings() -> (ScrollSettings, MouseWheelSettings) {
        let scroll = ScrollSettings {
            wait_after_scroll_ms: 0,
            ..ScrollSettings::default()
        };
        let wheel = MouseWheelSettings {
            scroll_to_top_pause_ms: 0,
            smooth_step_pause_ms: 0,
            ..MouseWheelSettings::default()
        };
        (scroll, wheel)
    }

    fn frame(shift: u32) -> DynamicImage {
        banded(320, 240, 20, shift)
    }

    fn engine(
        pointer: RecordingPointer,
        frames: Vec<Option<DynamicImage>>,
    ) -> (ScrollEngine, Rc<RefCell<RecordingPointer>>) {
        let pointer = Rc::new(RefCell::new(pointer));
        let (scroll, wheel) = quiet_settings();
        let engine = ScrollEngine::new(
            pointer.clone(),
            Box::new(ScriptedScreen::new(frames)),
            scroll,
            wheel,
        );
        (engine, pointer)
    }

    #[test]
    fn scroll_down_and_up_track_position() {
        let (mut engine, pointer) = engine(RecordingPointer::new(), vec![]);

        engine.scroll_down(None).expect("down");
        engine.scroll_down(Some(5)).expect("down 5");
        engine.scroll_up(Some(2)).expect("up 2");

        assert_eq!(pointer.borrow().scroll_deltas(), vec![-3, -5, 2]);
        assert_eq!(engine.position().scroll_count, 3);
        assert_eq!(engine.position().total_distance, 600);
    }

    #[test]
    fn rejected_wheel_event_changes_nothing() {
        let (mut engine, _) = engine(RecordingPointer::failing_scroll_after(0), vec![]);
        assert!(engine.scroll_down(None).is_err());
        assert_eq!(engine.position(), &ScrollPosition::new());
    }

    #[test]
    fn end_detected_on_third_identical_frame() {
        let (mut engine, _) = engine(RecordingPointer::new(), vec![]);
        let same = CaptureFrame::new(frame(0));
        let other = CaptureFrame::new(frame(20));

        assert!(!engine.detect_end_of_content(&same));
        assert!(!engine.detect_end_of_content(&same));
        assert!(engine.detect_end_of_content(&same));
        assert!(engine.detect_end_of_content(&other), "stays latched");
        assert!(engine.position().at_bottom);

        engine.reset();
        assert!(!engine.detect_end_of_content(&other));
    }

    #[test]
    fn change_restarts_the_run() {
        let (mut engine, _) = engine(RecordingPointer::new(), vec![]);
        let a = CaptureFrame::new(frame(0));
        let b = CaptureFrame::new(frame(20));

        for f in [&a, &a, &b, &b] {
            assert!(!engine.detect_end_of_content(f));
        }
        assert!(engine.detect_end_of_content(&b));
    }

    #[test]
    fn reset_zeroes_any_state() {
        let (mut engine, _) = engine(RecordingPointer::new(), vec![]);
        engine.reset();
        assert_eq!(engine.position(), &ScrollPosition::new());

        let same = CaptureFrame::new(frame(0));
        for _ in 0..4 {
            engine.detect_end_of_content(&same);
        }
        engine.scroll_down(None).expect("down");
        engine.scroll_up(Some(10)).expect("up");
        engine.reset();

        let position = engine.position();
        assert_eq!(position.scroll_count, 0);
        assert_eq!(position.total_distance, 0);
        assert!(!position.at_bottom);
        assert!(position.last_frame_signature.is_none());
    }

    #[test]
    fn loop_stops_when_first_frames_repeat() {
        let (mut engine, pointer) = engine(RecordingPointer::new(), vec![Some(frame(0))]);
        let mut seen = Vec::new();

        let results = engine.scroll_and_capture(
            |_, step| {
                seen.push(step);
                Ok(Some(step))
            },
            Some(10),
        );

        assert_eq!(seen, vec![0, 1]);
        assert_eq!(results, vec![0, 1]);
        assert_eq!(pointer.borrow().scroll_deltas().len(), 2);
        assert!(engine.position().at_bottom);
    }

    #[test]
    fn loop_runs_to_budget_while_content_changes() {
        let frames = (0..6).map(|i| Some(frame(i * 20))).collect();
        let (mut engine, _) = engine(RecordingPointer::new(), frames);

        let results = engine.scroll_and_capture(|_, step| Ok(Some(step)), Some(5));
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
        assert_eq!(engine.position().scroll_count, 5);
    }

    #[test]
    fn failed_scroll_ends_loop() {
        let frames = (0..6).map(|i| Some(frame(i * 20))).collect();
        let (mut engine, _) = engine(RecordingPointer::failing_scroll_after(1), frames);

        let results = engine.scroll_and_capture(|_, step| Ok(Some(step)), Some(10));
        assert_eq!(results, vec![0, 1]);
        assert_eq!(engine.position().scroll_count, 1);
    }

    #[test]
    fn failed_grab_skips_step_only() {
        let frames = vec![Some(frame(0)), None, Some(frame(20)), Some(frame(40))];
        let (mut engine, _) = engine(RecordingPointer::new(), frames);

        let results = engine.scroll_and_capture(|_, step| Ok(Some(step)), Some(4));
        assert_eq!(results, vec![0, 2, 3]);
    }

    #[test]
    fn repeated_grab_failures_end_loop() {
        let (mut engine, _) = engine(RecordingPointer::new(), vec![None, None, None, None]);

        let results: Vec<usize> = engine.scroll_and_capture(|_, step| Ok(Some(step)), Some(10));
        assert!(results.is_empty());
    }

    #[test]
    fn callback_errors_do_not_stop_loop() {
        let frames = (0..4).map(|i| Some(frame(i * 20))).collect();
        let (mut engine, _) = engine(RecordingPointer::new(), frames);

        let results = engine.scroll_and_capture(
            |_, step| {
                if step == 1 {
                    bail!("model unavailable");
                }
                Ok((step != 2).then_some(step))
            },
            Some(4),
        );
        assert_eq!(results, vec![0, 3]);
    }

    #[test]
    fn scroll_to_top_is_bounded_and_resets() {
        let (mut engine, pointer) = engine(RecordingPointer::new(), vec![]);
        engine.scroll_down(None).expect("down");

        engine.scroll_to_top().expect("top");
        let deltas = pointer.borrow().scroll_deltas();
        assert_eq!(deltas.len(), 21);
        assert!(deltas[1..].iter().all(|delta| *delta == 10));
        assert_eq!(engine.position(), &ScrollPosition::new());
    }

    #[test]
    fn scroll_step_refuses_at_bottom() {
        let (mut engine, pointer) = engine(RecordingPointer::new(), vec![]);
        assert!(engine.scroll_step().expect("step"));

        let same = CaptureFrame::new(frame(0));
        for _ in 0..3 {
            engine.detect_end_of_content(&same);
        }
        assert!(!engine.scroll_step().expect("step"));
        assert_eq!(pointer.borrow().scroll_deltas().len(), 1);
    }

    #[test]
    fn smooth_scroll_uses_single_notches() {
        let (mut engine, pointer) = engine(RecordingPointer::new(), vec![]);
        engine.smooth_scroll_down(Some(450)).expect("smooth");

        assert_eq!(pointer.borrow().scroll_deltas(), vec![-1, -1, -1, -1]);
        assert_eq!(engine.position().total_distance, 400);
        assert_eq!(engine.position().scroll_count, 1);
    }

    #[test]
    fn smooth_scroll_defaults_to_step_size() {
        let (mut engine, pointer) = engine(RecordingPointer::new(), vec![]);
        engine.smooth_scroll_down(None).expect("smooth");

        assert_eq!(pointer.borrow().scroll_deltas().len(), 8);
        assert_eq!(engine.position().total_distance, 800);
    }

    #[test]
    fn interrupted_smooth_scroll_books_nothing() {
        let (mut engine, pointer) = engine(RecordingPointer::failing_scroll_after(2), vec![]);

        assert!(engine.smooth_scroll_down(Some(800)).is_err());
        assert_eq!(pointer.borrow().scroll_deltas().len(), 2);
        assert_eq!(engine.position(), &ScrollPosition::new());
    }

    #[test]
    fn failed_deltas_still_reset_after_scroll_to_top() {
        let (mut engine, pointer) = engine(RecordingPointer::failing_scroll_after(5), vec![]);
        let same = CaptureFrame::new(frame(0));
        for _ in 0..3 {
            engine.detect_end_of_content(&same);
        }

        let err = engine.scroll_to_top().expect_err("deltas lost");
        assert!(err.to_string().contains("15 of 20"));
        assert_eq!(pointer.borrow().scroll_deltas().len(), 5);
        assert_eq!(engine.position(), &ScrollPosition::new());
    }

    #[test]
    fn scroll_to_block_goes_top_then_down() {
        let (mut engine, pointer) = engine(RecordingPointer::new(), vec![]);
        engine.scroll_to_block(7).expect("block");

        let deltas = pointer.borrow().scroll_deltas();
        assert_eq!(deltas.len(), 22);
        assert_eq!(&deltas[20..], &[-3, -3]);
        assert_eq!(engine.position().scroll_count, 2);
    }
}
