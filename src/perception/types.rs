use serde::{Deserialize, Serialize};

/// Upper bound of the normalized coordinate space on each axis.
pub const NORMALIZED_MAX: u16 = 1000;

/// A point in the resolution-independent 0–1000 space the model reads and writes.
///
/// Serialized as a two-element array `[x, y]`; values outside 0–1000 are
/// rejected at deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[i64; 2]", into = "[u16; 2]")]
pub struct NormalizedPoint {
    pub x: u16,
    pub y: u16,
}

impl NormalizedPoint {
    /// Returns `None` when either coordinate is outside 0–1000.
    pub fn new(x: i64, y: i64) -> Option<Self> {
        let range = 0..=NORMALIZED_MAX as i64;
        if range.contains(&x) && range.contains(&y) {
            Some(Self { x: x as u16, y: y as u16 })
        } else {
            None
        }
    }
}

impl TryFrom<[i64; 2]> for NormalizedPoint {
    type Error = String;

    fn try_from([x, y]: [i64; 2]) -> Result<Self, Self::Error> {
        Self::new(x, y).ok_or_else(|| format!("point ({x}, {y}) outside 0-{NORMALIZED_MAX}"))
    }
}

impl From<NormalizedPoint> for [u16; 2] {
    fn from(p: NormalizedPoint) -> Self {
        [p.x, p.y]
    }
}

/// Target dimensions of the image shown to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl Default for RenderSize {
    fn default() -> Self {
        Self { width: 512, height: 288 }
    }
}

/// User-selected capture region in full-screen physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x1: u32,
    pub y1: u32,
    pub w: u32,
    pub h: u32,
}

impl CropRegion {
    /// The whole frame, origin (0, 0).
    pub fn full(width: u32, height: u32) -> Self {
        Self { x1: 0, y1: 0, w: width, h: height }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub monitor_index: u32,
    pub scale_factor: f64,
    pub physical_width: u32,
    pub physical_height: u32,
}

/// A raw full-resolution capture of one monitor.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: image::RgbaImage,
    pub meta: ScreenshotMeta,
}

impl CapturedFrame {
    pub fn from_image(image: image::RgbaImage) -> Self {
        let (w, h) = image.dimensions();
        Self {
            image,
            meta: ScreenshotMeta {
                monitor_index: 0,
                scale_factor: 1.0,
                physical_width: w,
                physical_height: h,
            },
        }
    }
}
