//! Telemetry processing: raw GPS samples in, a smoothed and enriched
//! per-point time series out.
//!
//! Raw points carry only what the GPX decoder provides. Every derived field
//! (distance, speed, slope, bearing, camera scale) is defined exclusively on
//! processed [`TrackPoint`]s; the processing passes live in [`process`].

pub mod interp;
pub mod process;

use std::io::Write;

use crate::adjust::Directive;
use crate::foundation::error::{TrackcastError, TrackcastResult};

/// One raw GPS sample as decoded from the source file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Elevation in meters.
    pub ele_m: f64,
    /// Absolute timestamp in seconds (fractional; epoch is irrelevant, only
    /// differences are used).
    pub time_s: f64,
}

/// One processed series element: the raw sample plus every derived metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    /// Despiked elevation in meters.
    pub ele_m: f64,
    /// Absolute timestamp in seconds.
    pub time_s: f64,
    /// Cumulative great-circle distance from the track start, km.
    pub dist_km: f64,
    /// Windowed instantaneous speed, km/h.
    pub speed_kmh: f64,
    /// Time-windowed average speed, km/h.
    pub avg_speed_kmh: f64,
    /// Slope over a ~50 m distance window, percent.
    pub slope_pct: f64,
    /// Trailing-average slope, percent.
    pub smoothed_slope_pct: f64,
    /// Segment bearing after turn-rejection smoothing, radians.
    pub bearing_rad: f64,
    /// Continuous camera scale factor (>= 1.0 when zoomed out).
    pub map_scale: f64,
    /// Sub-integer-zoom scale remaining after the zoom delta is extracted.
    pub residual_scale: f64,
    /// Effective tile zoom used for fetching at this point.
    pub tile_zoom: u32,
}

impl TrackPoint {
    /// Seed a processed point from a raw sample; derived fields start at
    /// their index-0 defaults and are filled in by the processing passes.
    fn from_raw(raw: &RawPoint) -> Self {
        Self {
            lat: raw.lat,
            lon: raw.lon,
            ele_m: raw.ele_m,
            time_s: raw.time_s,
            dist_km: 0.0,
            speed_kmh: 0.0,
            avg_speed_kmh: 0.0,
            slope_pct: 0.0,
            smoothed_slope_pct: 0.0,
            bearing_rad: 0.0,
            map_scale: 1.0,
            residual_scale: 1.0,
            tile_zoom: 0,
        }
    }

    /// A fully defaulted point at lat/lon 0, for tests that only care about
    /// a few fields.
    #[cfg(test)]
    pub(crate) fn test_default() -> Self {
        Self::from_raw(&RawPoint {
            lat: 0.0,
            lon: 0.0,
            ele_m: 0.0,
            time_s: 0.0,
        })
    }
}

/// A fully processed track: the raw samples, the smoothed series, the total
/// distance and an optional render window.
///
/// Owned by the pipeline for the duration of one run; read-only once
/// [`Track::prepare`] returns.
#[derive(Debug)]
pub struct Track {
    pub raw: Vec<RawPoint>,
    pub points: Vec<TrackPoint>,
    pub total_distance_km: f64,
    render_from: usize,
    render_to: usize,
}

impl Track {
    /// Run the full telemetry pipeline over `raw` and resolve `directives`
    /// into the camera-scale series.
    ///
    /// Fewer than two points, or timestamps running backwards, is a fatal
    /// configuration error.
    pub fn prepare(
        raw: Vec<RawPoint>,
        opts: &process::ProcessOpts,
        directives: &[Directive],
    ) -> TrackcastResult<Self> {
        if raw.len() < 2 {
            return Err(TrackcastError::config(format!(
                "track must contain at least 2 points, got {}",
                raw.len()
            )));
        }
        if let Some(i) = (1..raw.len()).find(|&i| raw[i].time_s < raw[i - 1].time_s) {
            return Err(TrackcastError::config(format!(
                "track timestamps must be non-decreasing (point {i} precedes point {})",
                i - 1
            )));
        }

        let points = process::process(&raw, opts, directives)?;
        let total_distance_km = points.last().map(|p| p.dist_km).unwrap_or(0.0);
        let render_to = points.len();
        Ok(Self {
            raw,
            points,
            total_distance_km,
            render_from: 0,
            render_to,
        })
    }

    /// Timestamp of the first point, seconds.
    pub fn start_time_s(&self) -> f64 {
        self.points[0].time_s
    }

    /// Elapsed seconds of `p` relative to the track start.
    pub fn elapsed_s(&self, p: &TrackPoint) -> f64 {
        p.time_s - self.start_time_s()
    }

    /// The render window as point indices `[from, to)`.
    pub fn render_window(&self) -> (usize, usize) {
        (self.render_from, self.render_to)
    }

    /// Trim the output video to the window delimited by two boundary specs
    /// (`<v>s` or `<v>km`, either side optional) without recomputing the
    /// series. An inverted window collapses to an empty render.
    pub fn cut(&mut self, from: Option<&str>, to: Option<&str>) -> TrackcastResult<()> {
        let from_idx = match from {
            Some(spec) => parse_cut_boundary(spec, &self.points)?,
            None => 0,
        };
        let to_idx = match to {
            Some(spec) => parse_cut_boundary(spec, &self.points)?,
            None => self.points.len(),
        };

        if from_idx >= to_idx {
            tracing::warn!(from_idx, to_idx, "render window is inverted, rendering nothing");
            self.render_from = from_idx;
            self.render_to = from_idx;
        } else {
            self.render_from = from_idx;
            self.render_to = to_idx;
        }
        Ok(())
    }

    /// Write the processed series as text, one point per line. This is the
    /// debug mode: it exercises the whole telemetry processor with no
    /// rendering attached.
    pub fn dump_series(&self, w: &mut impl Write) -> std::io::Result<()> {
        for (i, p) in self.points.iter().enumerate() {
            writeln!(
                w,
                "{i}\tt=+{:.1}s\tlat={:.6}\tlon={:.6}\tele={:.1}m\tdist={:.3}km\t\
                 v={:.1}km/h\tvavg={:.1}km/h\tslope={:.1}%\tslope5={:.1}%\t\
                 brg={:.0}deg\tscale={:.3}\tz={}\trscale={:.3}",
                self.elapsed_s(p),
                p.lat,
                p.lon,
                p.ele_m,
                p.dist_km,
                p.speed_kmh,
                p.avg_speed_kmh,
                p.slope_pct,
                p.smoothed_slope_pct,
                p.bearing_rad.to_degrees(),
                p.map_scale,
                p.tile_zoom,
                p.residual_scale,
            )?;
        }
        Ok(())
    }
}

/// Patch missing (zero) elevations in place: leading zeros take the first
/// non-zero value, interior zeros carry the last non-zero value forward.
pub fn backfill_elevation(points: &mut [RawPoint]) {
    let Some(first_idx) = points.iter().position(|p| p.ele_m != 0.0) else {
        return;
    };
    let first_ele = points[first_idx].ele_m;
    for p in &mut points[..first_idx] {
        p.ele_m = first_ele;
    }

    let mut last = first_ele;
    for p in &mut points[first_idx..] {
        if p.ele_m != 0.0 {
            last = p.ele_m;
        } else {
            p.ele_m = last;
        }
    }
}

/// Resolve a cut boundary (`<v>s` elapsed time or `<v>km` distance) to the
/// first point index reaching it; points.len() when the track ends first.
fn parse_cut_boundary(spec: &str, points: &[TrackPoint]) -> TrackcastResult<usize> {
    let start = points[0].time_s;
    if let Some(km_str) = spec.strip_suffix("km") {
        let km: f64 = km_str
            .parse()
            .map_err(|_| TrackcastError::config(format!("invalid cut boundary '{spec}'")))?;
        Ok(points
            .iter()
            .position(|p| p.dist_km >= km)
            .unwrap_or(points.len()))
    } else if let Some(s_str) = spec.strip_suffix('s') {
        let secs: f64 = s_str
            .parse()
            .map_err(|_| TrackcastError::config(format!("invalid cut boundary '{spec}'")))?;
        Ok(points
            .iter()
            .position(|p| p.time_s - start >= secs)
            .unwrap_or(points.len()))
    } else {
        Err(TrackcastError::config(format!(
            "cut boundary '{spec}' must end in 's' or 'km'"
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::telemetry::process::ProcessOpts;

    /// A straight 1 Hz track heading north at roughly constant speed.
    pub(crate) fn straight_track(n: usize, step_deg: f64) -> Vec<RawPoint> {
        (0..n)
            .map(|i| RawPoint {
                lat: i as f64 * step_deg,
                lon: 0.0,
                ele_m: 100.0,
                time_s: i as f64,
            })
            .collect()
    }

    #[test]
    fn prepare_rejects_short_tracks() {
        let opts = ProcessOpts::default();
        assert!(Track::prepare(vec![], &opts, &[]).is_err());
        assert!(Track::prepare(straight_track(1, 1e-4), &opts, &[]).is_err());
        assert!(Track::prepare(straight_track(2, 1e-4), &opts, &[]).is_ok());
    }

    #[test]
    fn prepare_rejects_backwards_time() {
        let mut raw = straight_track(3, 1e-4);
        raw[2].time_s = 0.5;
        assert!(Track::prepare(raw, &ProcessOpts::default(), &[]).is_err());
    }

    #[test]
    fn backfill_fills_leading_and_interior_zeros() {
        let mut pts = vec![
            RawPoint { lat: 0.0, lon: 0.0, ele_m: 0.0, time_s: 0.0 },
            RawPoint { lat: 0.0, lon: 0.0, ele_m: 120.0, time_s: 1.0 },
            RawPoint { lat: 0.0, lon: 0.0, ele_m: 0.0, time_s: 2.0 },
            RawPoint { lat: 0.0, lon: 0.0, ele_m: 121.0, time_s: 3.0 },
        ];
        backfill_elevation(&mut pts);
        let eles: Vec<f64> = pts.iter().map(|p| p.ele_m).collect();
        assert_eq!(eles, vec![120.0, 120.0, 120.0, 121.0]);
    }

    #[test]
    fn cut_resolves_time_and_distance_boundaries() {
        let raw = straight_track(11, 1e-4);
        let mut track = Track::prepare(raw, &ProcessOpts::default(), &[]).unwrap();

        track.cut(Some("3s"), Some("8s")).unwrap();
        assert_eq!(track.render_window(), (3, 8));

        // Each 1e-4 deg step is ~11.1 m; 0.05 km is reached around point 5.
        track.cut(Some("0.05km"), None).unwrap();
        let (from, to) = track.render_window();
        assert_eq!(to, 11);
        assert!(from > 0 && from < 11);
        assert!(track.points[from].dist_km >= 0.05);
        assert!(track.points[from - 1].dist_km < 0.05);
    }

    #[test]
    fn cut_inverted_window_renders_nothing() {
        let raw = straight_track(11, 1e-4);
        let mut track = Track::prepare(raw, &ProcessOpts::default(), &[]).unwrap();
        track.cut(Some("8s"), Some("3s")).unwrap();
        let (from, to) = track.render_window();
        assert_eq!(from, to);
    }

    #[test]
    fn cut_rejects_malformed_boundaries() {
        let raw = straight_track(4, 1e-4);
        let mut track = Track::prepare(raw, &ProcessOpts::default(), &[]).unwrap();
        assert!(track.cut(Some("3"), None).is_err());
        assert!(track.cut(Some("xkm"), None).is_err());
    }

    #[test]
    fn dump_emits_one_line_per_point() {
        let raw = straight_track(5, 1e-4);
        let track = Track::prepare(raw, &ProcessOpts::default(), &[]).unwrap();
        let mut buf = Vec::new();
        track.dump_series(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.lines().next().unwrap().contains("t=+0.0s"));
    }
}
