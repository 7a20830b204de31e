// Normalized (0-1000) coordinates -> render-surface pixels and physical screen pixels.
//
// Both directions use the same round-half-up integer scaling so the
// compositor and the executor agree on where a normalized point lands.
use crate::perception::types::{CropRegion, NormalizedPoint, RenderSize, NORMALIZED_MAX};

/// `round_half_up(v * span / 1000)`, kept inside `0..span`.
fn scale(v: u16, span: u32) -> u32 {
    if span == 0 {
        return 0;
    }
    let max = NORMALIZED_MAX as u64;
    let scaled = (v as u64 * span as u64 + max / 2) / max;
    (scaled as u32).min(span - 1)
}

/// Pixel on the render surface; used only for annotation drawing.
pub fn to_render_pixels(p: NormalizedPoint, size: RenderSize) -> (u32, u32) {
    (scale(p.x, size.width), scale(p.y, size.height))
}

/// Absolute physical screen pixel; used only for execution.
///
/// Maps into crop-local pixels with the crop's size, then offsets by the
/// crop origin. Callers without a crop pass `CropRegion::full(screen_w, screen_h)`.
pub fn to_physical_pixels(p: NormalizedPoint, crop: &CropRegion) -> (i32, i32) {
    (
        (crop.x1 + scale(p.x, crop.w)) as i32,
        (crop.y1 + scale(p.y, crop.h)) as i32,
    )
}

/// Inverse of [`to_render_pixels`]: the normalized point nearest to a render pixel.
pub fn from_render_pixels(x: u32, y: u32, size: RenderSize) -> NormalizedPoint {
    let inv = |v: u32, span: u32| -> u16 {
        if span == 0 {
            return 0;
        }
        let max = NORMALIZED_MAX as u64;
        let n = (v as u64 * max + span as u64 / 2) / span as u64;
        n.min(max) as u16
    };
    NormalizedPoint { x: inv(x, size.width), y: inv(y, size.height) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: i64, y: i64) -> NormalizedPoint {
        NormalizedPoint::new(x, y).unwrap()
    }

    #[test]
    fn half_scale_crop_scenario() {
        let crop = CropRegion { x1: 100, y1: 50, w: 1024, h: 576 };
        let render = RenderSize { width: 512, height: 288 };
        let p = pt(500, 500);
        assert_eq!(to_physical_pixels(p, &crop), (612, 338));
        assert_eq!(to_render_pixels(p, render), (256, 144));
    }

    #[test]
    fn no_crop_means_full_screen_from_origin() {
        let full = CropRegion::full(1920, 1080);
        assert_eq!(to_physical_pixels(pt(0, 0), &full), (0, 0));
        assert_eq!(to_physical_pixels(pt(250, 750), &full), (480, 810));
    }

    #[test]
    fn rounds_half_up() {
        let size = RenderSize { width: 512, height: 288 };
        // 1 * 512 / 1000 = 0.512 -> 1 ; 100 * 288 / 1000 = 28.8 -> 29
        assert_eq!(to_render_pixels(pt(1, 100), size), (1, 29));
        // 999 * 512 / 1000 = 511.488 -> 511
        assert_eq!(to_render_pixels(pt(999, 0), size), (511, 0));
    }

    #[test]
    fn upper_edge_stays_on_surface() {
        let size = RenderSize { width: 512, height: 288 };
        assert_eq!(to_render_pixels(pt(1000, 1000), size), (511, 287));
        let crop = CropRegion { x1: 10, y1: 10, w: 100, h: 100 };
        assert_eq!(to_physical_pixels(pt(1000, 1000), &crop), (109, 109));
    }

    #[test]
    fn mapping_is_stable_and_round_trips_within_a_pixel() {
        let render = RenderSize { width: 512, height: 288 };
        let crop = CropRegion { x1: 100, y1: 50, w: 1024, h: 576 };
        // physical pixels per render pixel, plus rounding slack
        let tol_x = (crop.w / render.width) as i32 + 1;
        let tol_y = (crop.h / render.height) as i32 + 1;
        for x in (0..=1000).step_by(37) {
            for y in (0..=1000).step_by(41) {
                let p = pt(x, y);
                assert_eq!(to_render_pixels(p, render), to_render_pixels(p, render));

                let (rx, ry) = to_render_pixels(p, render);
                let back = from_render_pixels(rx, ry, render);
                let (rx2, ry2) = to_render_pixels(back, render);
                assert!((rx as i32 - rx2 as i32).abs() <= 1);
                assert!((ry as i32 - ry2 as i32).abs() <= 1);

                let (px, py) = to_physical_pixels(p, &crop);
                let (qx, qy) = to_physical_pixels(back, &crop);
                assert!((px - qx).abs() <= tol_x, "x {px} vs {qx}");
                assert!((py - qy).abs() <= tol_y, "y {py} vs {qy}");
            }
        }
    }
}
