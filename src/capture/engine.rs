use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use image::{DynamicImage, Rgba, RgbaImage};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use super::policy::SegmentationPolicy;
use super::screen::ScreenSource;
use super::types::{CaptureFrame, ContentBlock, ModelSubmission, Rect};
use crate::keyboard::ReservedRegion;
use crate::{log_debug, log_info, log_warn};

const ENABLE_LOGS: bool = true;

const MARKER_RADIUS: i32 = 10;
const MARKER_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Splits rows `[top, bottom)` into blocks of `block_height` separated by
/// `gap`, spanning the width minus `margin` on each side. The last block is
/// clipped to `bottom`.
///
/// Yields `ceil((bottom - top) / (block_height + gap))` blocks.
pub fn partition(
    width: i32,
    top: i32,
    bottom: i32,
    block_height: i32,
    gap: i32,
    margin: i32,
) -> Vec<Rect> {
    let stride = block_height + gap;
    if block_height <= 0 || stride <= 0 || bottom <= top {
        return Vec::new();
    }

    let left = margin;
    let right = (width - margin).max(left);
    let mut blocks = Vec::new();
    let mut current = top;
    while current < bottom {
        let block_bottom = (current + block_height).min(bottom);
        blocks.push(Rect::new(left, current, right, block_bottom));
        current += stride;
    }
    blocks
}

/// Grabs the screen, cuts away the on-screen keyboard and slices what is
/// left into content blocks.
pub struct CaptureEngine {
    screen: Box<dyn ScreenSource>,
    policy: SegmentationPolicy,
    output_dir: PathBuf,
    reserved_region: Option<ReservedRegion>,
}

impl CaptureEngine {
    pub fn new(
        screen: Box<dyn ScreenSource>,
        policy: SegmentationPolicy,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            screen,
            policy,
            output_dir,
            reserved_region: None,
        }
    }

    pub fn set_reserved_region(&mut self, region: Option<ReservedRegion>) {
        if let Some(region) = region {
            log_info!("excluding keyboard region {region:?} from captures");
        }
        self.reserved_region = region;
    }

    pub fn reserved_region(&self) -> Option<ReservedRegion> {
        self.reserved_region
    }

    pub fn policy(&self) -> &SegmentationPolicy {
        &self.policy
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn capture_full_screen(&mut self) -> Result<CaptureFrame> {
        let image = self.screen.grab().context("screen grab failed")?;
        log_debug!("full screen captured ({}x{})", image.width(), image.height());
        Ok(CaptureFrame::new(image))
    }

    /// Full screen, or with `exclude_reserved` only the part above the
    /// keyboard region.
    pub fn capture_viewport(&mut self, exclude_reserved: bool) -> Result<CaptureFrame> {
        let frame = self.capture_full_screen()?;
        if exclude_reserved {
            self.exclude_reserved(&frame)
        } else {
            Ok(frame)
        }
    }

    pub fn capture_region(&mut self, rect: Rect) -> Result<CaptureFrame> {
        let frame = self.capture_full_screen()?;
        Ok(frame.crop(rect))
    }

    /// Cuts `frame` off at the top edge of the keyboard region, which docks
    /// at the bottom of the screen. Frames are returned whole when no region
    /// is set.
    pub fn exclude_reserved(&self, frame: &CaptureFrame) -> Result<CaptureFrame> {
        let Some(region) = self.reserved_region else {
            return Ok(frame.clone());
        };

        let cut = region.top.clamp(0, frame.height() as i32);
        if cut == 0 {
            bail!("keyboard region {region:?} covers the whole frame");
        }
        Ok(frame.crop(Rect::new(0, 0, frame.width() as i32, cut)))
    }

    /// Fixed-height partition of `[content_top, content_bottom)` across the
    /// frame width, less the policy's side margins.
    pub fn segment(
        &self,
        frame: &CaptureFrame,
        content_top: i32,
        content_bottom: i32,
        block_height: i32,
        gap: i32,
    ) -> Vec<Rect> {
        partition(
            frame.width() as i32,
            content_top,
            content_bottom,
            block_height,
            gap,
            self.policy.side_margin,
        )
    }

    /// Policy click targets for a block. Offsets are fixed, so on unusual
    /// content they can miss the real controls.
    pub fn estimate_elements(&self, bounds: Rect) -> BTreeMap<String, (i32, i32)> {
        self.policy
            .elements
            .iter()
            .map(|element| (element.name.clone(), element.resolve(bounds)))
            .collect()
    }

    /// Segments an already captured full-screen frame. Ordinals continue from
    /// `ordinal_base` so blocks from successive scroll steps never collide.
    pub fn segment_frame(
        &self,
        frame: &CaptureFrame,
        ordinal_base: usize,
    ) -> Result<Vec<ContentBlock>> {
        let viewport = self.exclude_reserved(frame)?;
        let content_bottom = self.policy.content_bottom.min(viewport.height() as i32);
        let bounds = self.segment(
            &viewport,
            self.policy.content_top,
            content_bottom,
            self.policy.block_height,
            self.policy.block_gap,
        );

        let blocks: Vec<ContentBlock> = bounds
            .into_iter()
            .enumerate()
            .map(|(i, rect)| {
                ContentBlock::new(
                    rect,
                    ordinal_base + i,
                    self.estimate_elements(rect),
                    viewport.crop(rect).image,
                    viewport.captured_at,
                )
            })
            .collect();

        log_info!(
            "segmented {} blocks at ordinal {} ({})",
            blocks.len(),
            ordinal_base,
            self.policy.name
        );
        Ok(blocks)
    }

    pub fn capture_and_segment(&mut self, ordinal_base: usize) -> Result<Vec<ContentBlock>> {
        let frame = self.capture_full_screen()?;
        self.segment_frame(&frame, ordinal_base)
    }

    /// Writes `frame` as PNG under the output directory and returns the path.
    pub fn save(&self, frame: &CaptureFrame, prefix: &str) -> Result<PathBuf> {
        self.save_image(&frame.image, prefix, frame.captured_at)
    }

    fn save_image(
        &self,
        image: &DynamicImage,
        prefix: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let stem = format!("{prefix}_{}", timestamp.format("%Y%m%d_%H%M%S_%3f"));
        let mut path = self.output_dir.join(format!("{stem}.png"));
        let mut suffix = 1;
        while path.exists() {
            path = self.output_dir.join(format!("{stem}_{suffix}.png"));
            suffix += 1;
        }

        image
            .save(&path)
            .with_context(|| format!("Failed to write capture to {}", path.display()))?;
        log_debug!("capture saved: {}", path.display());
        Ok(path)
    }

    /// Saves the block image and bundles it with the block's coordinates for
    /// the scoring model.
    pub fn prepare_for_model(&self, block: &ContentBlock) -> Result<ModelSubmission> {
        let image_path = self.save_image(
            block.image(),
            &format!("block_{}", block.ordinal()),
            block.captured_at(),
        )?;
        Ok(ModelSubmission {
            image_path,
            timestamp: block.captured_at(),
            ordinal: block.ordinal(),
            bounds: block.bounds(),
            elements: block.elements().clone(),
        })
    }

    /// Copy of the block image with a ring and centre dot at every estimated
    /// element, for checking the offsets against what is really on screen.
    /// Element names go to the debug log; there is no text rendering.
    pub fn annotate(&self, block: &ContentBlock) -> DynamicImage {
        let mut canvas = block.image().to_rgba8();
        let bounds = block.bounds();
        for (name, &(x, y)) in block.elements() {
            let (cx, cy) = (x - bounds.left, y - bounds.top);
            draw_marker(&mut canvas, cx, cy);
            log_debug!("block {}: {name} at ({cx}, {cy})", block.ordinal());
        }
        DynamicImage::ImageRgba8(canvas)
    }

    /// Removes saved captures older than `days`. Returns how many went.
    pub fn cleanup_old_captures(&self, days: u64) -> Result<usize> {
        if !self.output_dir.exists() {
            return Ok(0);
        }

        let max_age = Duration::from_secs(days * 24 * 60 * 60);
        let now = SystemTime::now();
        let mut deleted = 0;
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
                continue;
            }
            let modified = fs::metadata(&path)?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                match fs::remove_file(&path) {
                    Ok(()) => deleted += 1,
                    Err(err) => log_warn!("failed to delete {}: {err}", path.display()),
                }
            }
        }

        if deleted > 0 {
            log_info!("cleaned up {deleted} old captures");
        }
        Ok(deleted)
    }
}

/// Two-pixel ring of `MARKER_RADIUS` around `(cx, cy)` plus a 3x3 dot on
/// the point itself, clipped to the canvas.
fn draw_marker(canvas: &mut RgbaImage, cx: i32, cy: i32) {
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    let inner = (MARKER_RADIUS - 1).pow(2);
    let outer = (MARKER_RADIUS + 1).pow(2);
    for dy in -(MARKER_RADIUS + 1)..=MARKER_RADIUS + 1 {
        for dx in -(MARKER_RADIUS + 1)..=MARKER_RADIUS + 1 {
            let d2 = dx * dx + dy * dy;
            let on_ring = (inner..=outer).contains(&d2);
            let on_dot = dx.abs() <= 1 && dy.abs() <= 1;
            let (px, py) = (cx + dx, cy + dy);
            if !(on_ring || on_dot) || px < 0 || py < 0 || px >= width || py >= height {
                continue;
            }
            canvas.put_pixel(px as u32, py as u32, MARKER_COLOR);
        }
    }
}
