use anyhow::Result;
use image::DynamicImage;

/// Source of full-screen frames.
pub trait ScreenSource {
    fn grab(&mut self) -> Result<DynamicImage>;
}

/// Primary monitor through `xcap`.
#[cfg(feature = "desktop")]
#[derive(Debug, Default)]
pub struct XcapScreen;

#[cfg(feature = "desktop")]
impl XcapScreen {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "desktop")]
impl ScreenSource for XcapScreen {
    fn grab(&mut self) -> Result<DynamicImage> {
        use anyhow::{anyhow, Context};
        use xcap::Monitor;

        let monitor = Monitor::all()
            .map_err(|err| anyhow!("failed to list monitors: {err}"))?
            .into_iter()
            .next()
            .context("no monitor found")?;
        let image = monitor
            .capture_image()
            .map_err(|err| anyhow!("screen grab failed: {err}"))?;
        Ok(DynamicImage::ImageRgba8(image))
    }
}
