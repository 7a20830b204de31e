/// Geometry pipeline: crop a full-resolution capture to the session's crop
/// region and resize it to the render size shown to the model.
///
/// The inverse direction never touches pixels; normalized coordinates are
/// mapped back to the screen by `executor::coordinator`.
use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::errors::{HeatloopError, HeatloopResult};
use crate::perception::types::{CropRegion, RenderSize};

/// Output of [`to_render_space`].
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// Image of exactly the requested render size.
    pub image: RgbaImage,
    /// The crop that was actually applied, after clamping to the frame.
    pub crop: CropRegion,
}

/// Clamp `crop` to a `frame_w`×`frame_h` frame.
///
/// Fails with `Geometry` when nothing of the region lies inside the frame.
pub fn clamp_crop(crop: CropRegion, frame_w: u32, frame_h: u32) -> HeatloopResult<CropRegion> {
    let x1 = crop.x1.min(frame_w);
    let y1 = crop.y1.min(frame_h);
    let x2 = crop.x1.saturating_add(crop.w).min(frame_w);
    let y2 = crop.y1.saturating_add(crop.h).min(frame_h);
    let clamped = CropRegion { x1, y1, w: x2 - x1, h: y2 - y1 };
    if clamped.is_empty() {
        return Err(HeatloopError::Geometry(format!(
            "crop {crop:?} lies outside {frame_w}x{frame_h} frame"
        )));
    }
    Ok(clamped)
}

/// Resolve the effective crop for a frame. Absence means the full frame;
/// regions that stick out of the frame are clamped, and regions entirely
/// outside fall back to the full frame. Adjustments are logged, never fatal.
pub fn resolve_crop(crop: Option<CropRegion>, frame_w: u32, frame_h: u32) -> CropRegion {
    let full = CropRegion::full(frame_w, frame_h);
    let Some(requested) = crop else {
        return full;
    };
    match clamp_crop(requested, frame_w, frame_h) {
        Ok(clamped) => {
            if clamped != requested {
                tracing::warn!(?requested, ?clamped, "crop region clamped to frame extents");
            }
            clamped
        }
        Err(e) => {
            tracing::warn!(error = %e, "using full frame instead of crop");
            full
        }
    }
}

/// Crop `frame` to `crop` (or the full frame) and resize to `size`.
///
/// Uses a triangle filter whose support widens with the downscale ratio, so
/// every source pixel contributes to the result (no nearest-neighbour
/// aliasing). Pure and deterministic.
pub fn to_render_space(
    frame: &RgbaImage,
    crop: Option<CropRegion>,
    size: RenderSize,
) -> HeatloopResult<RenderedFrame> {
    if size.width == 0 || size.height == 0 {
        return Err(HeatloopError::Geometry(format!(
            "render size {}x{} has no area",
            size.width, size.height
        )));
    }
    let (fw, fh) = frame.dimensions();
    if fw == 0 || fh == 0 {
        return Err(HeatloopError::Geometry("captured frame is empty".into()));
    }

    let crop = resolve_crop(crop, fw, fh);
    let region = imageops::crop_imm(frame, crop.x1, crop.y1, crop.w, crop.h).to_image();

    let image = if region.dimensions() == (size.width, size.height) {
        region
    } else {
        imageops::resize(&region, size.width, size.height, FilterType::Triangle)
    };

    tracing::debug!(
        frame = %format!("{fw}x{fh}"),
        crop = ?crop,
        render = %format!("{}x{}", size.width, size.height),
        "frame mapped to render space"
    );

    Ok(RenderedFrame { image, crop })
}
