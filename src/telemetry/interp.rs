//! Sub-sample time interpolation over the processed series.
//!
//! The renderer asks for track state at arbitrary playback times between
//! GPS fixes. Position and elevation interpolate linearly on the elapsed
//! ratio. Smoothed and derived metrics use a separate "derived ratio" that
//! snaps to the earlier point whenever the bracketing interval is shorter
//! than 2 seconds, so near-simultaneous fixes cannot amplify sample noise.

use crate::telemetry::TrackPoint;

/// Bracketing intervals shorter than this snap derived metrics to the
/// earlier point.
const MIN_DERIVED_INTERVAL_S: f64 = 2.0;

/// Sample the series at absolute time `time_s` (same clock as the points'
/// timestamps). Times before the first point clamp to it, times past the
/// last clamp to that.
///
/// The returned point carries the earlier bracket's tile zoom; when the
/// brackets disagree on zoom, the later residual scale is renormalized into
/// the earlier zoom frame first, so scale stays continuous across the
/// boundary.
pub fn sample_at(points: &[TrackPoint], time_s: f64) -> TrackPoint {
    debug_assert!(points.len() >= 2);

    if time_s <= points[0].time_s {
        return points[0];
    }
    if let Some(last) = points.last()
        && time_s >= last.time_s
    {
        return *last;
    }

    // First index whose timestamp reaches the target; the bracket is
    // [hi - 1, hi], so the earliest pair of a duplicate-timestamp cluster
    // wins. p1 is strictly before the target, so the bracket has width.
    let hi = points.partition_point(|p| p.time_s < time_s);
    let p1 = points[hi - 1];
    let p2 = points[hi];

    let dt = p2.time_s - p1.time_s;
    let ratio = (time_s - p1.time_s) / dt;
    let derived = if dt < MIN_DERIVED_INTERVAL_S { 0.0 } else { ratio };

    let p2_residual = if p1.tile_zoom != p2.tile_zoom {
        p2.residual_scale * 2f64.powi(p1.tile_zoom as i32 - p2.tile_zoom as i32)
    } else {
        p2.residual_scale
    };

    let lerp = |a: f64, b: f64, r: f64| a + (b - a) * r;
    TrackPoint {
        lat: lerp(p1.lat, p2.lat, ratio),
        lon: lerp(p1.lon, p2.lon, ratio),
        ele_m: lerp(p1.ele_m, p2.ele_m, ratio),
        time_s,
        dist_km: lerp(p1.dist_km, p2.dist_km, derived),
        speed_kmh: lerp(p1.speed_kmh, p2.speed_kmh, derived),
        avg_speed_kmh: lerp(p1.avg_speed_kmh, p2.avg_speed_kmh, derived),
        slope_pct: lerp(p1.slope_pct, p2.slope_pct, derived),
        smoothed_slope_pct: lerp(p1.smoothed_slope_pct, p2.smoothed_slope_pct, derived),
        bearing_rad: p1.bearing_rad,
        map_scale: lerp(p1.map_scale, p2.map_scale, ratio),
        residual_scale: lerp(p1.residual_scale, p2_residual, ratio),
        tile_zoom: p1.tile_zoom,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(time_s: f64) -> TrackPoint {
        TrackPoint {
            lat: 0.0,
            lon: 0.0,
            ele_m: 0.0,
            time_s,
            dist_km: 0.0,
            speed_kmh: 0.0,
            avg_speed_kmh: 0.0,
            slope_pct: 0.0,
            smoothed_slope_pct: 0.0,
            bearing_rad: 0.0,
            map_scale: 1.0,
            residual_scale: 1.0,
            tile_zoom: 15,
        }
    }

    #[test]
    fn position_is_linear_but_derived_snaps_under_two_seconds() {
        let mut p1 = point(0.0);
        p1.speed_kmh = 10.0;
        let mut p2 = point(1.0);
        p2.lat = 0.001;
        p2.speed_kmh = 20.0;
        let pts = [p1, p2];

        let mid = sample_at(&pts, 0.5);
        assert!((mid.lat - 0.0005).abs() < 1e-12);
        // 1 s bracket: the derived ratio is 0, speed snaps to the earlier point.
        assert_eq!(mid.speed_kmh, 10.0);

        let late = sample_at(&pts, 0.999);
        assert_eq!(late.speed_kmh, 10.0);
    }

    #[test]
    fn derived_metrics_interpolate_over_wide_brackets() {
        let mut p1 = point(0.0);
        p1.speed_kmh = 10.0;
        p1.dist_km = 1.0;
        let mut p2 = point(4.0);
        p2.speed_kmh = 20.0;
        p2.dist_km = 1.1;
        let pts = [p1, p2];

        let s = sample_at(&pts, 1.0);
        assert!((s.speed_kmh - 12.5).abs() < 1e-12);
        assert!((s.dist_km - 1.025).abs() < 1e-12);
    }

    #[test]
    fn clamps_outside_the_series() {
        let pts = [point(10.0), point(20.0)];
        assert_eq!(sample_at(&pts, 5.0).time_s, 10.0);
        assert_eq!(sample_at(&pts, 25.0).time_s, 20.0);
    }

    #[test]
    fn picks_the_right_bracket() {
        let mut pts = vec![point(0.0), point(10.0), point(20.0), point(30.0)];
        for (i, p) in pts.iter_mut().enumerate() {
            p.ele_m = i as f64 * 100.0;
        }
        let s = sample_at(&pts, 25.0);
        assert!((s.ele_m - 250.0).abs() < 1e-12);
    }

    #[test]
    fn duplicate_timestamps_resolve_to_the_first_point() {
        // Two points share t=10; sampling at 10 lands on the first of the
        // cluster, never the later duplicates.
        let mut p1 = point(10.0);
        p1.ele_m = 5.0;
        let mut p2 = point(10.0);
        p2.ele_m = 9.0;
        let pts = [point(0.0), p1, p2, point(20.0)];
        let s = sample_at(&pts, 10.0);
        assert_eq!(s.ele_m, 5.0);
    }

    #[test]
    fn residual_scale_renormalizes_across_zoom_boundary() {
        // p1 at zoom 15 residual 1.9, p2 one level out at residual 1.0:
        // p2 in p1's zoom frame is scale 2.0.
        let mut p1 = point(0.0);
        p1.residual_scale = 1.9;
        p1.map_scale = 1.9;
        let mut p2 = point(4.0);
        p2.tile_zoom = 14;
        p2.residual_scale = 1.0;
        p2.map_scale = 2.0;
        let pts = [p1, p2];

        let mid = sample_at(&pts, 2.0);
        assert_eq!(mid.tile_zoom, 15);
        assert!((mid.residual_scale - 1.95).abs() < 1e-12);
        assert!((mid.map_scale - 1.95).abs() < 1e-12);
    }
}
