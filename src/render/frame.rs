//! Per-frame composition: map mosaic, walked path, position marker, widget
//! decoration and the HUD indicators.
//!
//! `render_frame` is a pure function of its inputs (the tile caches only
//! ever yield the same bitmap for the same key), so frames can be rendered
//! in any order on any worker and still be identical.

use rusttype::Font;
use tiny_skia::{Color, FillRule, FilterQuality, Mask, PathBuilder, Pixmap, PixmapPaint, Transform};

use crate::foundation::core::{Fps, FrameIndex};
use crate::foundation::error::{TrackcastError, TrackcastResult};
use crate::geo;
use crate::render::draw;
use crate::telemetry::{Track, interp};
use crate::tiles::cache::TileCache;
use crate::tiles::scaled::ScaledTileCache;
use crate::tiles::TileId;

/// The slope readout refreshes on 5 s boundaries instead of every frame, so
/// the number is readable instead of flickering.
const SLOPE_DISPLAY_INTERVAL_S: f64 = 5.0;

/// Margin between the video edge and the map widget.
const WIDGET_MARGIN: f64 = 20.0;

/// Everything visual that is fixed for the duration of one run.
pub struct FrameStyle {
    pub widget_size: u32,
    pub tile_size: u32,
    pub video_width: u32,
    pub video_height: u32,
    pub path_color: Color,
    pub path_width: f64,
    pub border_color: Color,
    pub indicator_color: Color,
    /// HUD text is skipped entirely when no font is configured.
    pub font: Option<Font<'static>>,
}

impl FrameStyle {
    /// Video geometry sized to fit the widget plus the indicator rows below
    /// it: widget + 40 wide, widget + 200 tall.
    pub fn with_auto_geometry(widget_size: u32, tile_size: u32) -> Self {
        Self {
            widget_size,
            tile_size,
            video_width: widget_size + 40,
            video_height: widget_size + 200,
            path_color: Color::from_rgba8(0xff, 0x00, 0x00, 0xff),
            path_width: 3.0,
            border_color: Color::from_rgba8(0xff, 0x98, 0x00, 0xff),
            indicator_color: Color::WHITE,
            font: None,
        }
    }

    fn widget_radius(&self) -> f64 {
        f64::from(self.widget_size) / 2.0
    }
}

/// Render one frame of the configured segment.
///
/// Frame 0 is the start of the render window; playback time advances from
/// there at `fps`. Missing tiles leave their area blank.
pub fn render_frame(
    frame: FrameIndex,
    fps: Fps,
    track: &Track,
    tiles: &TileCache,
    scaled: &ScaledTileCache,
    style: &FrameStyle,
) -> TrackcastResult<Pixmap> {
    let (from, _) = track.render_window();
    let window_start = track.points[from].time_s;
    let t = window_start + fps.frame_to_secs(frame);
    let current = interp::sample_at(&track.points, t);

    // The slope readout holds the value from the start of its 5 s interval.
    let slope_display =
        interp::sample_at(&track.points, slope_display_time(window_start, t)).smoothed_slope_pct;

    let widget = render_widget(&current, track, tiles, scaled, style)?;

    let mut out = Pixmap::new(style.video_width, style.video_height).ok_or_else(|| {
        TrackcastError::pipeline(format!(
            "invalid video geometry {}x{}",
            style.video_width, style.video_height
        ))
    })?;
    out.draw_pixmap(
        WIDGET_MARGIN as i32,
        WIDGET_MARGIN as i32,
        widget.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );

    draw_widget_border(&mut out, style);
    draw_indicators(
        &mut out,
        style,
        current.speed_kmh,
        slope_display,
        current.dist_km,
        track.total_distance_km,
    );

    Ok(out)
}

/// Start of the 5 s refresh interval containing `t`, anchored to the render
/// window start (not the track start, which may be cut away).
fn slope_display_time(window_start: f64, t: f64) -> f64 {
    window_start
        + ((t - window_start) / SLOPE_DISPLAY_INTERVAL_S).floor() * SLOPE_DISPLAY_INTERVAL_S
}

/// The circular map widget: tile mosaic centered on the current position,
/// the walked path, and the position marker.
fn render_widget(
    current: &crate::telemetry::TrackPoint,
    track: &Track,
    tiles: &TileCache,
    scaled: &ScaledTileCache,
    style: &FrameStyle,
) -> TrackcastResult<Pixmap> {
    let size = style.widget_size;
    let radius = style.widget_radius();
    let tile_size = f64::from(style.tile_size);
    let residual = current.residual_scale;
    let zoom = current.tile_zoom;

    let mut widget = Pixmap::new(size, size)
        .ok_or_else(|| TrackcastError::pipeline("widget size must be nonzero"))?;

    let mut clip = Mask::new(size, size)
        .ok_or_else(|| TrackcastError::pipeline("widget size must be nonzero"))?;
    if let Some(circle) = draw::circle_path(radius, radius, radius) {
        clip.fill_path(&circle, FillRule::Winding, true, Transform::identity());
    }

    // World pixel position of the camera center at the effective zoom.
    let (cx_tiles, cy_tiles) = geo::tile_coords(current.lat, current.lon, zoom);
    let world_x = cx_tiles * tile_size;
    let world_y = cy_tiles * tile_size;

    // Tiles covering the widget disc at this scale.
    let reach = radius * residual;
    let tx_min = ((world_x - reach) / tile_size).floor() as i32;
    let tx_max = ((world_x + reach) / tile_size).floor() as i32;
    let ty_min = ((world_y - reach) / tile_size).floor() as i32;
    let ty_max = ((world_y + reach) / tile_size).floor() as i32;

    let use_prescaled = scaled.covers(residual);
    let shrink = 1.0 / residual;

    for tx in tx_min..=tx_max {
        for ty in ty_min..=ty_max {
            let tile = TileId { z: zoom, x: tx, y: ty };
            // Screen position of the tile origin, in f64 to keep world-pixel
            // magnitudes out of f32.
            let sx = radius + (f64::from(tx) * tile_size - world_x) * shrink;
            let sy = radius + (f64::from(ty) * tile_size - world_y) * shrink;

            let prescaled = if use_prescaled { scaled.lookup(residual, tile) } else { None };
            if let Some(img) = prescaled {
                widget.draw_pixmap(
                    0,
                    0,
                    (*img).as_ref(),
                    &PixmapPaint::default(),
                    Transform::from_translate(sx as f32, sy as f32),
                    Some(&clip),
                );
                continue;
            }

            let img = match tiles.fetch(tile) {
                Ok(img) => img,
                Err(e @ TrackcastError::TileResolution(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(?tile, error = %e, "tile unavailable, leaving blank");
                    continue;
                }
            };
            let paint = PixmapPaint {
                quality: FilterQuality::Bilinear,
                ..PixmapPaint::default()
            };
            widget.draw_pixmap(
                0,
                0,
                (*img).as_ref(),
                &paint,
                Transform::from_scale(shrink as f32, shrink as f32)
                    .post_translate(sx as f32, sy as f32),
                Some(&clip),
            );
        }
    }

    draw_walked_path(&mut widget, &clip, current, track, style);

    // Position marker: filled disc with a white ring, always dead center.
    if let Some(marker) = draw::circle_path(radius, radius, 8.0) {
        draw::fill_path(&mut widget, &marker, Color::from_rgba8(0, 0, 255, 255));
        draw::stroke_path(&mut widget, &marker, Color::WHITE, 2.0);
    }

    Ok(widget)
}

/// Path walked so far, in widget coordinates: every processed point strictly
/// before the current time plus the interpolated current position.
fn draw_walked_path(
    widget: &mut Pixmap,
    clip: &Mask,
    current: &crate::telemetry::TrackPoint,
    track: &Track,
    style: &FrameStyle,
) {
    let radius = style.widget_radius();
    let tile_size = f64::from(style.tile_size);
    let zoom = current.tile_zoom;
    let residual = current.residual_scale;
    let (cx_tiles, cy_tiles) = geo::tile_coords(current.lat, current.lon, zoom);

    let to_screen = |lat: f64, lon: f64| -> (f32, f32) {
        let (px, py) = geo::tile_coords(lat, lon, zoom);
        let dx = (px - cx_tiles) * tile_size / residual;
        let dy = (py - cy_tiles) * tile_size / residual;
        ((radius + dx) as f32, (radius + dy) as f32)
    };

    let mut pb = PathBuilder::new();
    let mut any = false;
    for p in track.points.iter().take_while(|p| p.time_s < current.time_s) {
        let (x, y) = to_screen(p.lat, p.lon);
        if any {
            pb.line_to(x, y);
        } else {
            pb.move_to(x, y);
            any = true;
        }
    }
    if !any {
        return;
    }
    let (x, y) = to_screen(current.lat, current.lon);
    pb.line_to(x, y);

    if let Some(path) = pb.finish() {
        let stroke = tiny_skia::Stroke {
            width: style.path_width as f32,
            line_cap: tiny_skia::LineCap::Round,
            line_join: tiny_skia::LineJoin::Round,
            ..tiny_skia::Stroke::default()
        };
        let paint = tiny_skia::Paint {
            shader: tiny_skia::Shader::SolidColor(style.path_color),
            anti_alias: true,
            ..tiny_skia::Paint::default()
        };
        widget.stroke_path(&path, &paint, &stroke, Transform::identity(), Some(clip));
    }
}

/// The ring around the widget: an offset dark arc lower-right and a light
/// arc upper-left under the main border circle, for a shallow 3D look.
fn draw_widget_border(out: &mut Pixmap, style: &FrameStyle) {
    let radius = style.widget_radius();
    let border = f64::from(style.widget_size) * 0.04;
    let cx = WIDGET_MARGIN + radius;
    let cy = WIDGET_MARGIN + radius;

    if let Some(shadow) = draw::arc_path(cx + border / 2.0, cy + border / 2.0, radius, -45.0, 135.0) {
        draw::stroke_path(out, &shadow, Color::from_rgba8(0, 0, 0, 80), border * 0.75);
    }
    if let Some(highlight) = draw::arc_path(cx + border / 2.0, cy + border / 2.0, radius, 135.0, 315.0)
    {
        draw::stroke_path(out, &highlight, Color::from_rgba8(255, 255, 255, 80), border * 0.75);
    }
    if let Some(ring) = draw::circle_path(cx, cy, radius) {
        draw::stroke_path(out, &ring, style.border_color, border);
    }
}

/// Speed and slope readouts plus the distance progress bar below the widget.
fn draw_indicators(
    out: &mut Pixmap,
    style: &FrameStyle,
    speed_kmh: f64,
    slope_pct: f64,
    dist_km: f64,
    total_km: f64,
) {
    let widget = f64::from(style.widget_size);
    let value_size = widget / 8.0;
    let unit_size = value_size / 2.0;
    let icon_size = widget / 9.0;
    let icon_width = widget / 150.0;
    let row1_y = WIDGET_MARGIN + widget + value_size * 1.2;
    let color = style.indicator_color;

    // Speed, left third.
    let speed_block_x = WIDGET_MARGIN;
    let block_width = widget / 3.0;
    draw::draw_speed_icon(
        out,
        speed_block_x + icon_size / 2.0,
        row1_y - 1.15 * value_size,
        icon_size,
        icon_width,
        color,
    );
    // Slope, right third.
    let slope_block_x = WIDGET_MARGIN + widget * 2.0 / 3.0;
    draw::draw_slope_icon(
        out,
        slope_block_x + icon_size / 2.0,
        row1_y - 1.15 * value_size,
        icon_size,
        icon_width,
        color,
    );

    if let Some(font) = &style.font {
        let right_aligned = |out: &mut Pixmap, value: &str, unit: &str, block_x: f64| {
            let vw = draw::measure_text(font, value, value_size);
            let uw = draw::measure_text(font, unit, unit_size);
            let start = block_x + block_width - (vw + uw);
            draw::draw_text(out, font, value, start, row1_y, value_size, color);
            draw::draw_text(out, font, unit, start + vw, row1_y, unit_size, color);
        };
        right_aligned(out, &format!("{:.0}", speed_kmh.round()), " km/h", speed_block_x);
        right_aligned(out, &format!("{slope_pct:.1}"), " %", slope_block_x);
    }

    // Distance progress bar.
    let row2_y = row1_y + unit_size * 1.2;
    let bar_height = 20.0;
    let progress = if total_km > 0.0 {
        (dist_km / total_km).clamp(0.0, 1.0)
    } else {
        0.0
    };
    draw::fill_rect(out, WIDGET_MARGIN, row2_y, widget, bar_height, Color::from_rgba8(80, 80, 80, 255));
    draw::fill_rect(
        out,
        WIDGET_MARGIN,
        row2_y,
        widget * progress,
        bar_height,
        Color::from_rgba8(100, 180, 255, 255),
    );

    if let Some(font) = &style.font {
        let text = format!("{dist_km:.2} / {total_km:.2} km");
        let tw = draw::measure_text(font, &text, unit_size);
        draw::draw_text(
            out,
            font,
            &text,
            WIDGET_MARGIN + (widget - tw) / 2.0,
            row2_y + bar_height / 2.0 + unit_size * 0.35,
            unit_size,
            color,
        );
    }
}
