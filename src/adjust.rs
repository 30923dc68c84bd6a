//! Track adjustments: user-authored camera-scale directives and their
//! resolution into a per-point multiplier series.
//!
//! The text format is line oriented. Each line names a point locator, a
//! `scale=` target and an optional `duration=` in seconds:
//!
//! ```text
//! 0       scale=1.5
//! 4.2km   scale=2 duration=10
//! +0.8km  scale=1
//! 130s    scale=1.3
//! ```
//!
//! Parsing is strict and happens before any expensive work. Resolving a
//! locator to a point can still fail at runtime (the track may simply be
//! shorter than the locator); that is a warning, not an error.

use crate::foundation::error::{TrackcastError, TrackcastResult};
use crate::telemetry::TrackPoint;

/// Default transition window when a directive has no `duration=`.
const DEFAULT_TRANSITION_S: f64 = 20.0;

/// Where on the track a directive takes effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Locator {
    /// The literal `0`: the first track point.
    Start,
    /// `<v>km` or `+<v>km`: cumulative distance, absolute or relative to the
    /// previous distance locator.
    DistanceKm { value: f64, relative: bool },
    /// `<v>s` or `+<v>s`: elapsed time, absolute or relative to the previous
    /// time locator.
    ElapsedS { value: f64, relative: bool },
}

/// One parsed adjustment directive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Directive {
    pub locator: Locator,
    pub scale: f64,
    pub duration_s: Option<f64>,
}

/// A directive resolved to a concrete point index.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ScaleChange {
    point_index: usize,
    target_scale: f64,
    transition_s: f64,
}

/// Parse the adjustment text. Blank lines are skipped; any malformed line is
/// a fatal configuration error.
pub fn parse_adjustments(text: &str) -> TrackcastResult<Vec<Directive>> {
    let mut directives = Vec::new();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let locator_str = parts.next().unwrap_or_default();
        let locator = parse_locator(locator_str).ok_or_else(|| {
            TrackcastError::config(format!(
                "invalid locator on line {}: '{locator_str}'",
                lineno + 1
            ))
        })?;

        let mut scale: Option<f64> = None;
        let mut duration_s: Option<f64> = None;
        let mut saw_param = false;
        for part in parts {
            saw_param = true;
            if let Some(v) = part.strip_prefix("scale=") {
                scale = Some(v.parse().map_err(|_| {
                    TrackcastError::config(format!(
                        "invalid scale value on line {}: '{part}'",
                        lineno + 1
                    ))
                })?);
            } else if let Some(v) = part.strip_prefix("duration=") {
                duration_s = Some(v.parse().map_err(|_| {
                    TrackcastError::config(format!(
                        "invalid duration value on line {}: '{part}'",
                        lineno + 1
                    ))
                })?);
            } else {
                return Err(TrackcastError::config(format!(
                    "unknown parameter on line {}: '{part}'",
                    lineno + 1
                )));
            }
        }
        if !saw_param {
            return Err(TrackcastError::config(format!(
                "invalid directive on line {}: '{line}'",
                lineno + 1
            )));
        }

        let scale = scale.ok_or_else(|| {
            TrackcastError::config(format!("missing scale parameter on line {}", lineno + 1))
        })?;
        if scale <= 0.0 {
            return Err(TrackcastError::config(format!(
                "scale must be positive on line {}: {scale}",
                lineno + 1
            )));
        }

        directives.push(Directive {
            locator,
            scale,
            duration_s,
        });
    }

    Ok(directives)
}

fn parse_locator(s: &str) -> Option<Locator> {
    if s == "0" {
        return Some(Locator::Start);
    }
    let relative = s.starts_with('+');
    let body = s.strip_prefix('+').unwrap_or(s);
    if let Some(v) = body.strip_suffix("km") {
        return v
            .parse()
            .ok()
            .map(|value| Locator::DistanceKm { value, relative });
    }
    if let Some(v) = body.strip_suffix('s') {
        return v
            .parse()
            .ok()
            .map(|value| Locator::ElapsedS { value, relative });
    }
    None
}

/// Resolve directives to point indices, in file order. Relative locators
/// accumulate onto the previous target of the same kind whether or not that
/// target was reachable. Unreachable targets are skipped with a warning.
fn resolve(directives: &[Directive], points: &[TrackPoint]) -> Vec<ScaleChange> {
    let mut changes = Vec::with_capacity(directives.len());
    let start_time = points.first().map(|p| p.time_s).unwrap_or(0.0);
    let mut last_km = 0.0;
    let mut last_s = 0.0;

    for d in directives {
        let point_index = match d.locator {
            Locator::Start => Some(0),
            Locator::DistanceKm { value, relative } => {
                let target = if relative { last_km + value } else { value };
                last_km = target;
                points.iter().position(|p| p.dist_km >= target)
            }
            Locator::ElapsedS { value, relative } => {
                let target = if relative { last_s + value } else { value };
                last_s = target;
                points.iter().position(|p| p.time_s - start_time >= target)
            }
        };

        match point_index {
            Some(point_index) => changes.push(ScaleChange {
                point_index,
                target_scale: d.scale,
                transition_s: d.duration_s.unwrap_or(DEFAULT_TRANSITION_S),
            }),
            None => {
                tracing::warn!(locator = ?d.locator, "adjustment locator beyond track end, skipping")
            }
        }
    }

    changes
}

/// Turn directives into a per-point scale-multiplier series (default 1.0).
///
/// Each change interpolates from the previous change's target (1.0 before
/// the first) to its own target, linearly in log2 space over its transition
/// window, then holds the target. A change's window ends where the next
/// change begins.
pub fn multipliers(directives: &[Directive], points: &[TrackPoint]) -> Vec<f64> {
    let changes = resolve(directives, points);
    let mut out = vec![1.0f64; points.len()];
    if changes.is_empty() {
        return out;
    }

    // A change at the very first point needs no transition: its target is
    // the baseline for the whole track.
    let mut base_scale = 1.0;
    let mut first = 0;
    if changes[0].point_index == 0 {
        base_scale = changes[0].target_scale;
        first = 1;
    }
    out.fill(base_scale);

    for i in first..changes.len() {
        let change = changes[i];
        let prev_scale = if i > 0 {
            changes[i - 1].target_scale
        } else {
            base_scale
        };
        let window_end = changes
            .get(i + 1)
            .map(|next| next.point_index)
            .unwrap_or(points.len());
        let start_time = points[change.point_index].time_s;

        let log_prev = prev_scale.log2();
        let log_target = change.target_scale.log2();

        for j in change.point_index..window_end {
            let elapsed = points[j].time_s - start_time;
            out[j] = if elapsed < change.transition_s {
                let progress = (elapsed / change.transition_s).max(0.0);
                2f64.powf(log_prev + progress * (log_target - log_prev))
            } else {
                change.target_scale
            };
        }
    }

    out
}

/// The distinct non-unity scales the directives pin the camera to, sorted.
///
/// This is what the pre-scaled tile cache is keyed on: directives hold a
/// scale for long stretches, so shrinking those tiles once up front pays
/// off. Transient scales (transition ramps, dynamic speed scaling) rescale
/// on the fly instead.
pub fn target_scales(directives: &[Directive], points: &[TrackPoint]) -> Vec<f64> {
    let mut scales: Vec<f64> = resolve(directives, points)
        .iter()
        .map(|c| c.target_scale)
        .filter(|&s| s != 1.0)
        .collect();
    scales.sort_by(f64::total_cmp);
    scales.dedup();
    scales
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize) -> Vec<TrackPoint> {
        // 1 Hz, ~11.1 m per second heading north.
        let raw: Vec<crate::telemetry::RawPoint> = (0..n)
            .map(|i| crate::telemetry::RawPoint {
                lat: i as f64 * 1e-4,
                lon: 0.0,
                ele_m: 100.0,
                time_s: 1000.0 + i as f64,
            })
            .collect();
        crate::telemetry::process::process(
            &raw,
            &crate::telemetry::process::ProcessOpts::default(),
            &[],
        )
        .unwrap()
    }

    #[test]
    fn parse_accepts_the_documented_grammar() {
        let text = "0 scale=1.5\n\n  4.2km scale=2 duration=10\n+0.8km scale=1\n130s scale=1.3\n+5s scale=2\n";
        let out = parse_adjustments(text).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].locator, Locator::Start);
        assert_eq!(out[0].scale, 1.5);
        assert_eq!(out[0].duration_s, None);
        assert_eq!(
            out[1].locator,
            Locator::DistanceKm { value: 4.2, relative: false }
        );
        assert_eq!(out[1].duration_s, Some(10.0));
        assert_eq!(
            out[2].locator,
            Locator::DistanceKm { value: 0.8, relative: true }
        );
        assert_eq!(out[4].locator, Locator::ElapsedS { value: 5.0, relative: true });
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert!(parse_adjustments("10s").is_err()); // no parameters
        assert!(parse_adjustments("10s duration=5").is_err()); // scale missing
        assert!(parse_adjustments("10s scale=abc").is_err());
        assert!(parse_adjustments("10s scale=2 duration=abc").is_err());
        assert!(parse_adjustments("10s scale=2 wat=1").is_err());
        assert!(parse_adjustments("nowhere scale=2").is_err());
        assert!(parse_adjustments("10s scale=-1").is_err());
        assert!(parse_adjustments("").unwrap().is_empty());
    }

    #[test]
    fn relative_locators_accumulate_on_targets() {
        let pts = series(100);
        let directives = parse_adjustments("30s scale=2\n+30s scale=1\n").unwrap();
        let changes = resolve(&directives, &pts);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].point_index, 30);
        assert_eq!(changes[1].point_index, 60);
    }

    #[test]
    fn unreachable_locator_is_skipped() {
        let pts = series(10);
        let directives = parse_adjustments("500km scale=2\n5s scale=1.5\n").unwrap();
        let changes = resolve(&directives, &pts);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].point_index, 5);
    }

    #[test]
    fn target_scales_lists_directive_targets_only() {
        let mut pts = series(100);
        let directives =
            parse_adjustments("0 scale=1.5\n30s scale=2\n+30s scale=2\n80s scale=1\n").unwrap();
        assert_eq!(target_scales(&directives, &pts), vec![1.5, 2.0]);

        // A varying per-point map scale (speed-driven) contributes nothing:
        // only directive targets are worth pre-scaling.
        for (i, p) in pts.iter_mut().enumerate() {
            p.map_scale = 1.0 + (i % 90) as f64 / 100.0;
        }
        assert!(target_scales(&[], &pts).is_empty());
    }

    #[test]
    fn start_directive_sets_the_baseline() {
        let pts = series(20);
        let directives = parse_adjustments("0 scale=1.5\n").unwrap();
        let out = multipliers(&directives, &pts);
        assert!(out.iter().all(|&m| m == 1.5));
    }

    #[test]
    fn transition_interpolates_in_log_space_and_snaps_at_duration() {
        let pts = series(60);
        let directives =
            parse_adjustments("0 scale=1\n20s scale=2 duration=10\n").unwrap();
        let out = multipliers(&directives, &pts);

        assert_eq!(out[0], 1.0);
        assert_eq!(out[19], 1.0);
        assert_eq!(out[20], 1.0); // progress 0 at the transition start
        // Halfway through a 1 -> 2 transition: 2^0.5.
        assert!((out[25] - 2f64.sqrt()).abs() < 1e-12, "{}", out[25]);
        assert_eq!(out[30], 2.0); // duration elapsed: exact target
        assert!(out[31..].iter().all(|&m| m == 2.0));
    }

    #[test]
    fn default_transition_is_twenty_seconds() {
        let pts = series(60);
        let directives = parse_adjustments("0 scale=1\n10s scale=4\n").unwrap();
        let out = multipliers(&directives, &pts);
        assert!(out[29] < 4.0);
        assert_eq!(out[30], 4.0);
        // Log-space midpoint of 1 -> 4 is 2.
        assert!((out[20] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn first_directive_off_start_transitions_from_one() {
        let pts = series(60);
        let directives = parse_adjustments("10s scale=4 duration=10\n").unwrap();
        let out = multipliers(&directives, &pts);
        assert!(out[..10].iter().all(|&m| m == 1.0));
        assert!((out[15] - 2.0).abs() < 1e-12);
        assert_eq!(out[20], 4.0);
    }

    #[test]
    fn next_directive_bounds_the_window() {
        let pts = series(60);
        let directives =
            parse_adjustments("0 scale=1\n10s scale=4 duration=40\n20s scale=1 duration=5\n")
                .unwrap();
        let out = multipliers(&directives, &pts);
        // The 40 s transition is cut off where the next change begins.
        assert!(out[19] < 4.0);
        // From index 20 the third change owns the series; after its 5 s
        // transition the multiplier is exactly 1 again.
        assert_eq!(out[25], 1.0);
        assert!(out[21] > 1.0);
    }
}
