//! Low-level drawing helpers on top of the CPU rasterizer: arc and circle
//! paths, stroked/filled primitives, glyph rendering and the two HUD icons.

use kurbo::{PathEl, Point as KPoint, Shape as _, Vec2};
use rusttype::{Font, Scale, point};
use tiny_skia::{
    Color, FillRule, LineCap, LineJoin, Paint, Path, PathBuilder, Pixmap, Shader, Stroke,
    Transform,
};

/// Flattening tolerance for arc-to-bezier conversion, in pixels.
const ARC_TOLERANCE: f64 = 0.1;

pub fn circle_path(cx: f64, cy: f64, r: f64) -> Option<Path> {
    let mut pb = PathBuilder::new();
    pb.push_circle(cx as f32, cy as f32, r as f32);
    pb.finish()
}

/// Circular arc from `start_deg` to `end_deg` (clockwise in screen space,
/// 0 degrees pointing right).
pub fn arc_path(cx: f64, cy: f64, r: f64, start_deg: f64, end_deg: f64) -> Option<Path> {
    let arc = kurbo::Arc {
        center: KPoint::new(cx, cy),
        radii: Vec2::new(r, r),
        start_angle: start_deg.to_radians(),
        sweep_angle: (end_deg - start_deg).to_radians(),
        x_rotation: 0.0,
    };

    let mut pb = PathBuilder::new();
    for el in arc.path_elements(ARC_TOLERANCE) {
        match el {
            PathEl::MoveTo(p) => pb.move_to(p.x as f32, p.y as f32),
            PathEl::LineTo(p) => pb.line_to(p.x as f32, p.y as f32),
            PathEl::QuadTo(p1, p2) => {
                pb.quad_to(p1.x as f32, p1.y as f32, p2.x as f32, p2.y as f32)
            }
            PathEl::CurveTo(p1, p2, p3) => pb.cubic_to(
                p1.x as f32,
                p1.y as f32,
                p2.x as f32,
                p2.y as f32,
                p3.x as f32,
                p3.y as f32,
            ),
            PathEl::ClosePath => pb.close(),
        }
    }
    pb.finish()
}

fn solid(color: Color) -> Paint<'static> {
    Paint {
        shader: Shader::SolidColor(color),
        anti_alias: true,
        ..Paint::default()
    }
}

pub fn stroke_path(pixmap: &mut Pixmap, path: &Path, color: Color, width: f64) {
    let stroke = Stroke {
        width: width as f32,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(path, &solid(color), &stroke, Transform::identity(), None);
}

pub fn fill_path(pixmap: &mut Pixmap, path: &Path, color: Color) {
    pixmap.fill_path(
        path,
        &solid(color),
        FillRule::Winding,
        Transform::identity(),
        None,
    );
}

pub fn fill_rect(pixmap: &mut Pixmap, x: f64, y: f64, w: f64, h: f64, color: Color) {
    let Some(rect) = tiny_skia::Rect::from_xywh(x as f32, y as f32, w as f32, h as f32) else {
        return;
    };
    pixmap.fill_rect(rect, &solid(color), Transform::identity(), None);
}

/// Advance width of `text` at `size` pixels.
pub fn measure_text(font: &Font<'_>, text: &str, size: f64) -> f64 {
    let scale = Scale::uniform(size as f32);
    font.layout(text, scale, point(0.0, 0.0))
        .last()
        .map(|g| f64::from(g.position().x + g.unpositioned().h_metrics().advance_width))
        .unwrap_or(0.0)
}

/// Draw `text` with its baseline-left corner at (x, y) and return the
/// advance width. Glyph coverage blends source-over into the pixmap.
pub fn draw_text(
    pixmap: &mut Pixmap,
    font: &Font<'_>,
    text: &str,
    x: f64,
    y: f64,
    size: f64,
    color: Color,
) -> f64 {
    let scale = Scale::uniform(size as f32);
    let width = pixmap.width() as i32;
    let height = pixmap.height() as i32;
    let mut advance = 0.0f64;

    let glyphs: Vec<_> = font.layout(text, scale, point(x as f32, y as f32)).collect();
    for glyph in &glyphs {
        advance = f64::from(
            glyph.position().x + glyph.unpositioned().h_metrics().advance_width - x as f32,
        );
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, coverage| {
            let px = bb.min.x + gx as i32;
            let py = bb.min.y + gy as i32;
            if px < 0 || py < 0 || px >= width || py >= height || coverage <= 0.0 {
                return;
            }
            let idx = (py * width + px) as usize;
            blend_pixel(pixmap, idx, color, coverage);
        });
    }
    advance
}

fn blend_pixel(pixmap: &mut Pixmap, idx: usize, color: Color, coverage: f32) {
    let pixels = pixmap.pixels_mut();
    let dst = pixels[idx];
    let a = color.alpha() * coverage;
    let inv = 1.0 - a;

    let to_u8 = |v: f32| (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    let out_a = to_u8(a + f32::from(dst.alpha()) / 255.0 * inv);
    // Premultiplied components can never exceed alpha; rounding can push
    // them one past it, so clamp.
    let channel = |src: f32, d: u8| to_u8(src * a + f32::from(d) / 255.0 * inv).min(out_a);
    let blended = tiny_skia::PremultipliedColorU8::from_rgba(
        channel(color.red(), dst.red()),
        channel(color.green(), dst.green()),
        channel(color.blue(), dst.blue()),
        out_a,
    );
    if let Some(c) = blended {
        pixels[idx] = c;
    }
}

/// Speedometer glyph: a 210-degree dial arc with a needle.
pub fn draw_speed_icon(pixmap: &mut Pixmap, x: f64, y: f64, size: f64, line_width: f64, color: Color) {
    if let Some(dial) = arc_path(x, y, size / 2.0, 165.0, 375.0) {
        stroke_path(pixmap, &dial, color, line_width);
    }

    let needle_angle = 210.0f64.to_radians();
    let mut pb = PathBuilder::new();
    pb.move_to(x as f32, y as f32);
    pb.line_to(
        (x + needle_angle.cos() * size / 2.2) as f32,
        (y + needle_angle.sin() * size / 2.2) as f32,
    );
    if let Some(needle) = pb.finish() {
        stroke_path(pixmap, &needle, color, line_width);
    }
}

/// Incline glyph: a 30-degree wedge.
pub fn draw_slope_icon(pixmap: &mut Pixmap, x: f64, y: f64, size: f64, line_width: f64, color: Color) {
    let leg_x = size;
    let leg_y = size * 30.0f64.to_radians().tan();

    let mut pb = PathBuilder::new();
    pb.move_to((x + leg_x) as f32, (y + leg_y / 2.0) as f32);
    pb.line_to(x as f32, (y + leg_y / 2.0) as f32);
    pb.line_to((x + leg_x) as f32, (y - leg_y / 2.0) as f32);
    if let Some(wedge) = pb.finish() {
        stroke_path(pixmap, &wedge, color, line_width);
    }
}
