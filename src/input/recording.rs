use anyhow::{bail, Result};

use super::PointerDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    Click { x: i32, y: i32, clicks: u32 },
    Scroll { clicks: i32 },
}

/// Pointer that performs nothing and remembers every request. Backs dry runs
/// and the test suites.
#[derive(Debug, Default)]
pub struct RecordingPointer {
    events: Vec<PointerEvent>,
    fail_scroll_after: Option<usize>,
    scrolls: usize,
}

impl RecordingPointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every wheel request after the first `n` fail, the way a surface
    /// that lost focus stops accepting input.
    pub fn failing_scroll_after(n: usize) -> Self {
        Self {
            fail_scroll_after: Some(n),
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[PointerEvent] {
        &self.events
    }

    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.events
            .iter()
            .filter_map(|event| match *event {
                PointerEvent::Click { x, y, .. } => Some((x, y)),
                PointerEvent::Scroll { .. } => None,
            })
            .collect()
    }

    pub fn scroll_deltas(&self) -> Vec<i32> {
        self.events
            .iter()
            .filter_map(|event| match *event {
                PointerEvent::Scroll { clicks } => Some(clicks),
                PointerEvent::Click { .. } => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl PointerDevice for RecordingPointer {
    fn click_at(&mut self, x: i32, y: i32, clicks: u32) -> Result<()> {
        self.events.push(PointerEvent::Click { x, y, clicks });
        Ok(())
    }

    fn scroll(&mut self, clicks: i32) -> Result<()> {
        if let Some(limit) = self.fail_scroll_after {
            if self.scrolls >= limit {
                bail!("wheel event rejected");
            }
        }
        self.scrolls += 1;
        self.events.push(PointerEvent::Scroll { clicks });
        Ok(())
    }
}
