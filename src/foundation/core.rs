use crate::foundation::error::{TrackcastError, TrackcastResult};

/// Absolute 0-based frame index in output timeline space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameIndex(pub u64);

/// Output frame rate in frames per second.
///
/// Fractional rates (23.976, 29.97) are first-class, so this is a plain f64
/// wrapper rather than a rational.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fps(pub f64);

impl Fps {
    /// Create a validated, finite, positive frame rate.
    pub fn new(fps: f64) -> TrackcastResult<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(TrackcastError::config("framerate must be finite and > 0"));
        }
        Ok(Self(fps))
    }

    /// Playback time of a frame index, in seconds from the timeline start.
    pub fn frame_to_secs(self, frame: FrameIndex) -> f64 {
        frame.0 as f64 / self.0
    }

    /// Number of whole frames that fit into `secs` seconds (floor semantics).
    pub fn secs_to_frames(self, secs: f64) -> u64 {
        (secs * self.0).max(0.0) as u64
    }
}

/// Parse a `#RRGGBB` hex color into an opaque rasterizer color.
pub fn parse_hex_color(s: &str) -> TrackcastResult<tiny_skia::Color> {
    let hex = s
        .strip_prefix('#')
        .ok_or_else(|| TrackcastError::config(format!("color '{s}' must start with '#'")))?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TrackcastError::config(format!(
            "color '{s}' must be exactly '#RRGGBB'"
        )));
    }
    let byte = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16)
            .map_err(|e| TrackcastError::config(format!("color '{s}': {e}")))
    };
    Ok(tiny_skia::Color::from_rgba8(
        byte(0..2)?,
        byte(2..4)?,
        byte(4..6)?,
        255,
    ))
}
