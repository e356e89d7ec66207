//! Synthetic pointer output.
//!
//! Everything this crate does to the target machine goes through a
//! [`PointerDevice`]: key presses on the on-screen keyboard are clicks, page
//! movement is wheel deltas. No keyboard events are ever emitted.

#[cfg(feature = "desktop")]
mod desktop;
mod recording;

#[cfg(feature = "desktop")]
pub use desktop::EnigoPointer;
pub use recording::{PointerEvent, RecordingPointer};

use anyhow::Result;
use std::cell::RefCell;
use std::rc::Rc;

pub trait PointerDevice {
    /// Moves to `(x, y)` in screen pixels and presses the primary button
    /// `clicks` times.
    fn click_at(&mut self, x: i32, y: i32, clicks: u32) -> Result<()>;

    /// Sends `clicks` wheel notches. Positive values scroll the view up,
    /// negative values scroll it down.
    fn scroll(&mut self, clicks: i32) -> Result<()>;
}

/// The one pointer of the machine, shared by the keyboard controller and the
/// scroll engine of a single session.
///
/// `Rc` keeps the handle on the thread that created it, so two sessions on
/// different threads can never drive the same pointer.
pub type PointerHandle = Rc<RefCell<dyn PointerDevice>>;

pub fn shared<P: PointerDevice + 'static>(device: P) -> PointerHandle {
    Rc::new(RefCell::new(device))
}
