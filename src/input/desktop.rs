use anyhow::{anyhow, Result};
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Mouse, Settings};

use super::PointerDevice;

/// Drives the real system pointer.
pub struct EnigoPointer {
    enigo: Enigo,
}

impl EnigoPointer {
    pub fn new() -> Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|err| anyhow!("failed to connect to the input system: {err}"))?;
        Ok(Self { enigo })
    }
}

impl PointerDevice for EnigoPointer {
    fn click_at(&mut self, x: i32, y: i32, clicks: u32) -> Result<()> {
        self.enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|err| anyhow!("pointer move to ({x}, {y}) failed: {err}"))?;
        for _ in 0..clicks {
            self.enigo
                .button(Button::Left, Direction::Click)
                .map_err(|err| anyhow!("click at ({x}, {y}) failed: {err}"))?;
        }
        Ok(())
    }

    fn scroll(&mut self, clicks: i32) -> Result<()> {
        // enigo counts positive lengths as downward travel.
        self.enigo
            .scroll(-clicks, Axis::Vertical)
            .map_err(|err| anyhow!("wheel delta {clicks} failed: {err}"))
    }
}
