//! The telemetry processing passes.
//!
//! Each pass is one forward sweep over the series. The uniform fallback rule:
//! when a window is empty or degenerate, a point takes its predecessor's
//! value (or the defined default at index 0).

use crate::adjust::{self, Directive};
use crate::foundation::error::TrackcastResult;
use crate::geo;
use crate::telemetry::{RawPoint, TrackPoint};

/// Elevation jumps beyond this are treated as GPS altitude noise and clamped.
const ELE_SPIKE_M: f64 = 3.0;
/// Half-width, in samples, of the centered speed window.
const SPEED_WINDOW_SAMPLES: usize = 2;
/// Half-width, in seconds, of the average-speed window.
const AVG_SPEED_WINDOW_S: f64 = 15.0;
/// Average speed at which dynamic scaling starts to zoom out.
const DYN_SCALE_MIN_KMH: f64 = 17.0;
/// Average speed at which dynamic scaling reaches full 2x zoom-out.
const DYN_SCALE_MAX_KMH: f64 = 26.0;
/// Minimum distance, in meters, to either side of a point for the slope window.
const SLOPE_WINDOW_M: f64 = 25.0;
/// Trailing sample count for the smoothed slope.
const SLOPE_SMOOTH_SAMPLES: usize = 5;
/// Turns sharper than this are rejected by the bearing smoother.
const MAX_TURN_RAD: f64 = std::f64::consts::FRAC_PI_4;

/// Processing options for the telemetry passes.
#[derive(Clone, Copy, Debug)]
pub struct ProcessOpts {
    /// Scale the camera with average speed (off: map_scale stays 1.0 until
    /// track adjustments multiply in).
    pub dynamic_scale: bool,
    /// Tile zoom at scale 1.0; zoom-out deltas subtract from this.
    pub base_zoom: u32,
}

impl Default for ProcessOpts {
    fn default() -> Self {
        Self {
            dynamic_scale: false,
            base_zoom: 15,
        }
    }
}

/// Run every processing pass over `raw` and return the enriched series.
///
/// The caller guarantees `raw.len() >= 2` with non-decreasing timestamps.
pub fn process(
    raw: &[RawPoint],
    opts: &ProcessOpts,
    directives: &[Directive],
) -> TrackcastResult<Vec<TrackPoint>> {
    let mut points: Vec<TrackPoint> = raw.iter().map(TrackPoint::from_raw).collect();

    despike_elevation(&mut points);
    cumulative_distance(&mut points);
    windowed_speed(&mut points);
    average_speed(&mut points);
    dynamic_scale(&mut points, opts);

    let multipliers = adjust::multipliers(directives, &points);
    for (p, m) in points.iter_mut().zip(&multipliers) {
        p.map_scale *= m;
    }

    bearings(&mut points);
    slope(&mut points);
    smoothed_slope(&mut points);
    zoom_decomposition(&mut points, opts.base_zoom);

    Ok(points)
}

/// Clamp single-sample elevation spikes to the previous value. This is an
/// outlier clamp, not a filter: changes at or below the threshold pass
/// through exactly.
fn despike_elevation(points: &mut [TrackPoint]) {
    for i in 1..points.len() {
        if (points[i].ele_m - points[i - 1].ele_m).abs() > ELE_SPIKE_M {
            points[i].ele_m = points[i - 1].ele_m;
        }
    }
}

fn cumulative_distance(points: &mut [TrackPoint]) {
    for i in 1..points.len() {
        let seg = geo::haversine_km(
            points[i - 1].lat,
            points[i - 1].lon,
            points[i].lat,
            points[i].lon,
        );
        points[i].dist_km = points[i - 1].dist_km + seg;
    }
}

/// Instantaneous speed over a centered window of roughly +-2 samples,
/// clamped at the series ends.
fn windowed_speed(points: &mut [TrackPoint]) {
    let n = points.len();
    for i in 0..n {
        let start = i.saturating_sub(SPEED_WINDOW_SAMPLES);
        let end = (i + SPEED_WINDOW_SAMPLES).min(n - 1);

        let dist_km = points[end].dist_km - points[start].dist_km;
        let time_s = points[end].time_s - points[start].time_s;
        points[i].speed_kmh = if time_s > 0.0 {
            dist_km * 3600.0 / time_s
        } else if i > 0 {
            points[i - 1].speed_kmh
        } else {
            0.0
        };
    }
}

/// Mean speed over a +-15 s time window, computed with an amortized
/// two-pointer sweep: each index enters and leaves the window exactly once.
fn average_speed(points: &mut [TrackPoint]) {
    let n = points.len();
    let mut left = 0usize;
    let mut right = 0usize;
    let mut sum = 0.0f64;
    let mut count = 0usize;

    for i in 0..n {
        let window_start = points[i].time_s - AVG_SPEED_WINDOW_S;
        let window_end = points[i].time_s + AVG_SPEED_WINDOW_S;

        while right < n && points[right].time_s <= window_end {
            sum += points[right].speed_kmh;
            count += 1;
            right += 1;
        }
        while left < n && points[left].time_s < window_start {
            sum -= points[left].speed_kmh;
            count -= 1;
            left += 1;
        }

        points[i].avg_speed_kmh = if count > 0 {
            sum / count as f64
        } else if i > 0 {
            points[i - 1].avg_speed_kmh
        } else {
            points[i].speed_kmh
        };
    }
}

/// Map average speed linearly onto scale [1.0, 2.0] between the two speed
/// thresholds, pinned outside. Identity when dynamic scaling is disabled.
fn dynamic_scale(points: &mut [TrackPoint], opts: &ProcessOpts) {
    if !opts.dynamic_scale {
        return;
    }
    for p in points.iter_mut() {
        let factor = ((p.avg_speed_kmh - DYN_SCALE_MIN_KMH)
            / (DYN_SCALE_MAX_KMH - DYN_SCALE_MIN_KMH))
            .clamp(0.0, 1.0);
        p.map_scale = 1.0 + factor;
    }
}

/// Per-segment forward azimuth, with turns sharper than 45 degrees rejected:
/// the point holds the previous smoothed bearing instead. The comparison is
/// against the previous *raw* bearing, so a single sharp sample is held and
/// the smoother recovers on the next calm segment.
fn bearings(points: &mut [TrackPoint]) {
    let n = points.len();
    let mut raw = vec![0.0f64; n];
    for i in 0..n - 1 {
        raw[i] = geo::initial_bearing(
            points[i].lat,
            points[i].lon,
            points[i + 1].lat,
            points[i + 1].lon,
        );
    }
    raw[n - 1] = raw[n.saturating_sub(2)];

    points[0].bearing_rad = raw[0];
    for i in 1..n {
        points[i].bearing_rad = if geo::turn_angle(raw[i - 1], raw[i]) <= MAX_TURN_RAD {
            raw[i]
        } else {
            points[i - 1].bearing_rad
        };
    }
}

/// Slope over a window found on the distance axis: the nearest points at
/// least 25 m behind and ahead in cumulative distance. Without a qualifying
/// window (track ends, near-zero movement) the previous slope carries over.
fn slope(points: &mut [TrackPoint]) {
    let n = points.len();
    for i in 0..n {
        let behind = (0..=i)
            .rev()
            .find(|&j| (points[i].dist_km - points[j].dist_km) * 1000.0 >= SLOPE_WINDOW_M);
        let ahead = (i..n)
            .find(|&j| (points[j].dist_km - points[i].dist_km) * 1000.0 >= SLOPE_WINDOW_M);

        points[i].slope_pct = match (behind, ahead) {
            (Some(b), Some(a)) => {
                let dist_m = (points[a].dist_km - points[b].dist_km) * 1000.0;
                let ele_m = points[a].ele_m - points[b].ele_m;
                if dist_m > 1.0 {
                    ele_m / dist_m * 100.0
                } else {
                    0.0
                }
            }
            _ if i > 0 => points[i - 1].slope_pct,
            _ => 0.0,
        };
    }
}

/// Trailing simple average of the slope over the last 5 samples
/// (approximately 5 seconds at 1 Hz logging).
fn smoothed_slope(points: &mut [TrackPoint]) {
    let n = points.len();
    for i in 0..n {
        let start = i.saturating_sub(SLOPE_SMOOTH_SAMPLES - 1);
        let window = &points[start..=i];
        let sum: f64 = window.iter().map(|p| p.slope_pct).sum();
        points[i].smoothed_slope_pct = sum / window.len() as f64;
    }
}

/// Split the continuous camera scale into an integer zoom-out delta and the
/// residual image-space scale, so large scale-outs fetch coarser tiles
/// instead of quadratically more of them.
fn zoom_decomposition(points: &mut [TrackPoint], base_zoom: u32) {
    for p in points.iter_mut() {
        let zoom_out = if p.map_scale > 1.0 {
            p.map_scale.log2().floor()
        } else {
            0.0
        };
        p.tile_zoom = (base_zoom as i64 - zoom_out as i64).max(0) as u32;
        p.residual_scale = p.map_scale / 2f64.powf(zoom_out);
    }
}
