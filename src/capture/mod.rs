pub mod engine;
pub mod policy;
pub mod screen;
pub mod types;

pub use engine::{partition, CaptureEngine};
pub use policy::{Anchor, ElementOffset, SegmentationPolicy};
#[cfg(feature = "desktop")]
pub use screen::XcapScreen;
pub use screen::ScreenSource;
pub use types::{CaptureFrame, ContentBlock, ModelSubmission, Rect};
