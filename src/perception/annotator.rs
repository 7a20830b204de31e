/// Burn one turn's actions into the next turn's screenshot.
///
/// Every click-like action leaves a wide radial "heat" blob and every drag a
/// capsule of blobs along its path, so the model sees the area as already
/// touched and is discouraged from re-targeting nearby. Heat accumulates
/// additively: clustered or repeated actions come out brighter without any
/// extra bookkeeping. Crisp markers are drawn on top at the exact points.
use image::RgbaImage;

use crate::agent_engine::state::Action;
use crate::config::HeatConfig;
use crate::errors::{HeatloopError, HeatloopResult};
use crate::executor::coordinator::to_render_pixels;
use crate::perception::codec;
use crate::perception::types::{NormalizedPoint, RenderSize};

/// Single-channel additive heat surface; 0.0 is fully transparent.
#[derive(Debug, Clone)]
pub struct HeatField {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl HeatField {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0.0; (width * height) as usize] }
    }

    pub fn intensity(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.data[(y * self.width + x) as usize]
    }

    /// Add a linear radial gradient: `peak` at the centre, 0 at `radius`.
    pub fn add_blob(&mut self, cx: f32, cy: f32, radius: f32, peak: f32) {
        if radius <= 0.0 || self.width == 0 || self.height == 0 {
            return;
        }
        let x0 = (cx - radius).floor().max(0.0) as u32;
        let y0 = (cy - radius).floor().max(0.0) as u32;
        let x1 = ((cx + radius).ceil() as i64).clamp(0, self.width as i64 - 1) as u32;
        let y1 = ((cy + radius).ceil() as i64).clamp(0, self.height as i64 - 1) as u32;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
                if d < radius {
                    self.data[(y * self.width + x) as usize] += peak * (1.0 - d / radius);
                }
            }
        }
    }

    /// Inclusive bounding box `(min_x, min_y, max_x, max_y)` of all heated pixels.
    pub fn hot_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.data[(y * self.width + x) as usize] <= 0.0 {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((a, b, c, d)) => (a.min(x), b.min(y), c.max(x), d.max(y)),
                });
            }
        }
        bounds
    }
}

/// Blob radius in render pixels for a `width`×`height` surface.
pub fn blob_radius(width: u32, height: u32, style: &HeatConfig) -> f32 {
    style.radius_ratio * width.min(height) as f32
}

/// Accumulate heat for `actions` on a `width`×`height` surface.
pub fn heat_field(width: u32, height: u32, actions: &[Action], style: &HeatConfig) -> HeatField {
    let mut field = HeatField::new(width, height);
    let size = RenderSize { width, height };
    let radius = blob_radius(width, height, style);
    let center = |p: NormalizedPoint| {
        let (x, y) = to_render_pixels(p, size);
        (x as f32, y as f32)
    };

    for action in actions {
        if let Some(p) = action.click_point() {
            let (x, y) = center(p);
            field.add_blob(x, y, radius, style.opacity);
        } else if let Action::Drag { start, end } = action {
            let (sx, sy) = center(*start);
            let (ex, ey) = center(*end);
            field.add_blob(sx, sy, radius, style.opacity);
            field.add_blob(ex, ey, radius, style.opacity);

            let len = ((ex - sx).powi(2) + (ey - sy).powi(2)).sqrt();
            let step = style.drag_step_ratio * radius;
            if step > 0.0 && len > step {
                let inner = style.drag_radius_ratio * radius;
                let n = (len / step).floor() as u32;
                for i in 1..=n {
                    let t = (i as f32 * step) / len;
                    if t >= 1.0 {
                        break;
                    }
                    field.add_blob(sx + (ex - sx) * t, sy + (ey - sy) * t, inner, style.opacity);
                }
            }
        }
    }
    field
}

/// Annotate `base` with heat and markers for `actions`.
///
/// Deterministic; an empty action list returns `base` unchanged.
pub fn annotate(base: &RgbaImage, actions: &[Action], style: &HeatConfig) -> RgbaImage {
    let mut canvas = base.clone();
    if actions.is_empty() {
        return canvas;
    }
    let (w, h) = canvas.dimensions();

    let field = heat_field(w, h, actions, style);
    let [hr, hg, hb] = style.color;
    for (x, y, p) in canvas.enumerate_pixels_mut() {
        let a = field.intensity(x, y).min(1.0);
        if a <= 0.0 {
            continue;
        }
        p[0] = add_channel(p[0], hr, a);
        p[1] = add_channel(p[1], hg, a);
        p[2] = add_channel(p[2], hb, a);
        p[3] = 255;
    }

    let size = RenderSize { width: w, height: h };
    let m = marker_size(w, h);
    let [mr, mg, mb] = style.marker_color;
    let col = [mr, mg, mb, 255];
    for action in actions {
        match action {
            Action::Click { point } => {
                let (x, y) = to_render_pixels(*point, size);
                draw_ring(&mut canvas, x as i32, y as i32, m, col);
                draw_crosshair(&mut canvas, x as i32, y as i32, m * 3 / 5, col);
            }
            Action::DoubleClick { point } => {
                let (x, y) = to_render_pixels(*point, size);
                draw_ring(&mut canvas, x as i32, y as i32, m, col);
                draw_ring(&mut canvas, x as i32, y as i32, m + m / 2, col);
                draw_crosshair(&mut canvas, x as i32, y as i32, m * 3 / 5, col);
            }
            Action::RightClick { point } => {
                let (x, y) = to_render_pixels(*point, size);
                draw_ring(&mut canvas, x as i32, y as i32, m, col);
                draw_crosshair(&mut canvas, x as i32, y as i32, m * 3 / 5, col);
                // tab at the upper right distinguishes the right button
                let off = m + 3;
                draw_square(&mut canvas, x as i32 + off, y as i32 - off, 3, col);
            }
            Action::Scroll { point, delta } => {
                let (x, y) = to_render_pixels(*point, size);
                draw_ring(&mut canvas, x as i32, y as i32, m, col);
                let dir = if *delta < 0 { -1 } else { 1 };
                draw_line(&mut canvas, x as i32, y as i32, x as i32, y as i32 + dir * m * 2, col, 1);
            }
            Action::Drag { start, end } => {
                let (sx, sy) = to_render_pixels(*start, size);
                let (ex, ey) = to_render_pixels(*end, size);
                draw_line(&mut canvas, sx as i32, sy as i32, ex as i32, ey as i32, col, 1);
                draw_disc(&mut canvas, sx as i32, sy as i32, (m / 2).max(2), col);
                draw_ring(&mut canvas, ex as i32, ey as i32, (m * 3 / 5).max(3), col);
            }
            Action::Write { .. } | Action::Press { .. } => {}
        }
    }

    canvas
}

/// Decode `src_png`, annotate, and re-encode as PNG.
///
/// With no actions the input bytes are returned as-is.
pub fn annotate_png(
    src_png: &[u8],
    actions: &[Action],
    style: &HeatConfig,
) -> HeatloopResult<Vec<u8>> {
    if actions.is_empty() {
        return Ok(src_png.to_vec());
    }
    let base = codec::decode_rgba(src_png)
        .map_err(|e| HeatloopError::Geometry(format!("annotate load: {e}")))?;
    let out = annotate(&base, actions, style);
    tracing::debug!(actions = actions.len(), "heat and markers composited");
    codec::encode_png(&out)
}

fn add_channel(base: u8, heat: u8, a: f32) -> u8 {
    (base as f32 + heat as f32 * a).round().min(255.0) as u8
}

fn marker_size(w: u32, h: u32) -> i32 {
    ((w.min(h) as f32 * 0.05).round() as i32).max(5)
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_ring(canvas: &mut RgbaImage, cx: i32, cy: i32, r: i32, col: [u8; 4]) {
    // midpoint circle
    let (mut x, mut y, mut d) = (0, r, 1 - r);
    while x <= y {
        for (dx, dy) in [(x, y), (-x, y), (x, -y), (-x, -y), (y, x), (-y, x), (y, -x), (-y, -x)] {
            set_pixel(canvas, cx + dx, cy + dy, col);
        }
        x += 1;
        if d < 0 {
            d += 2 * x + 1;
        } else {
            y -= 1;
            d += 2 * (x - y) + 1;
        }
    }
}

fn draw_disc(canvas: &mut RgbaImage, cx: i32, cy: i32, r: i32, col: [u8; 4]) {
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                set_pixel(canvas, cx + dx, cy + dy, col);
            }
        }
    }
}

fn draw_square(canvas: &mut RgbaImage, cx: i32, cy: i32, half: i32, col: [u8; 4]) {
    for dy in -half..=half {
        for dx in -half..=half {
            set_pixel(canvas, cx + dx, cy + dy, col);
        }
    }
}

fn draw_crosshair(canvas: &mut RgbaImage, cx: i32, cy: i32, size: i32, col: [u8; 4]) {
    for i in -size..=size {
        set_pixel(canvas, cx + i, cy, col);
        set_pixel(canvas, cx, cy + i, col);
    }
}

/// Bresenham line, `half` pixels of padding on each side.
fn draw_line(canvas: &mut RgbaImage, mut x0: i32, mut y0: i32, x1: i32, y1: i32, col: [u8; 4], half: i32) {
    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;
    loop {
        for tx in -half..=half {
            for ty in -half..=half {
                set_pixel(canvas, x0 + tx, y0 + ty, col);
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn set_pixel(canvas: &mut RgbaImage, x: i32, y: i32, col: [u8; 4]) {
    let (w, h) = canvas.dimensions();
    if x < 0 || y < 0 || x >= w as i32 || y >= h as i32 {
        return;
    }
    let p = canvas.get_pixel_mut(x as u32, y as u32);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}
