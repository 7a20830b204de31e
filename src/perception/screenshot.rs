use async_trait::async_trait;

use crate::errors::{HeatloopError, HeatloopResult};
use crate::perception::traits::ScreenSource;
use crate::perception::types::{CapturedFrame, ScreenshotMeta};

/// Captures the primary monitor through `xcap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryMonitor;

#[async_trait]
impl ScreenSource for PrimaryMonitor {
    async fn capture(&self) -> HeatloopResult<CapturedFrame> {
        tokio::task::spawn_blocking(capture_primary_blocking)
            .await
            .map_err(|e| HeatloopError::Capture(format!("join: {e}")))?
    }
}

fn primary_monitor() -> HeatloopResult<xcap::Monitor> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| HeatloopError::Capture(format!("enumerate monitors: {e}")))?;
    let count = monitors.len();
    let mut monitors = monitors.into_iter();
    let mut fallback = None;
    for m in monitors.by_ref() {
        if m.is_primary() {
            return Ok(m);
        }
        if fallback.is_none() {
            fallback = Some(m);
        }
    }
    fallback.ok_or_else(|| HeatloopError::Capture(format!("no monitor among {count} to capture")))
}

fn capture_primary_blocking() -> HeatloopResult<CapturedFrame> {
    let monitor = primary_monitor()?;
    let shot = monitor
        .capture_image()
        .map_err(|e| HeatloopError::Capture(format!("capture: {e}")))?;

    // Rebuild through raw bytes so the buffer type is this crate's `image`.
    let (w, h) = (shot.width(), shot.height());
    let image = image::RgbaImage::from_raw(w, h, shot.into_raw())
        .ok_or_else(|| HeatloopError::Capture("capture buffer size mismatch".into()))?;

    tracing::debug!(width = w, height = h, "primary monitor captured");

    Ok(CapturedFrame {
        image,
        meta: ScreenshotMeta {
            monitor_index: 0,
            scale_factor: monitor.scale_factor() as f64,
            physical_width: w,
            physical_height: h,
        },
    })
}
