//! The render/encode pipeline: parallel frame rendering, strict-order
//! writing, and the stall watchdog.
//!
//! Workers render independent frames and push PNG payloads over a bounded
//! channel; one writer thread reorders arrivals and feeds the sink in index
//! order. A frame that fails to render is logged and skipped, so the writer
//! still advances and the encoder stream stays strictly ordered.

use std::collections::HashMap;
use std::sync::mpsc;
use std::time::Duration;

use rayon::prelude::*;

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{Fps, FrameIndex};
use crate::foundation::error::{TrackcastError, TrackcastResult};
use crate::render::frame::{FrameStyle, render_frame};
use crate::telemetry::Track;
use crate::tiles::cache::TileCache;
use crate::tiles::scaled::ScaledTileCache;

/// No frame arriving at the writer for this long means a hung worker or
/// fetch; the run is unrecoverable.
const DEFAULT_WATCHDOG: Duration = Duration::from_secs(60);

/// Scheduling knobs for one render run.
#[derive(Clone, Debug)]
pub struct PipelineOpts {
    pub fps: Fps,
    /// Render worker threads; 0 means one per logical CPU.
    pub workers: usize,
    /// Bound of the frame-result channel.
    pub channel_capacity: usize,
    /// Writer-side stall timeout.
    pub watchdog: Duration,
}

impl PipelineOpts {
    /// Defaults derived from the frame rate: the channel holds about two
    /// seconds of output so a slow encoder throttles the workers.
    pub fn new(fps: Fps) -> Self {
        Self {
            fps,
            workers: 0,
            channel_capacity: ((fps.0 * 2.0) as usize).max(4),
            watchdog: DEFAULT_WATCHDOG,
        }
    }
}

/// Outcome of one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub total_frames: u64,
    pub written: u64,
    /// Frames that failed to render or encode and were skipped.
    pub failed: u64,
}

struct FrameMsg {
    idx: u64,
    /// `None` marks a frame that failed to render; the writer skips it.
    payload: Option<Vec<u8>>,
}

/// Index-ordered holding area for completed frames.
///
/// `push` stores one arrival and drains the longest contiguous run starting
/// at the next expected index.
pub struct Reorderer {
    next: u64,
    pending: HashMap<u64, Option<Vec<u8>>>,
}

impl Reorderer {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: HashMap::new(),
        }
    }

    pub fn next_expected(&self) -> u64 {
        self.next
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, idx: u64, payload: Option<Vec<u8>>) -> Vec<(u64, Option<Vec<u8>>)> {
        self.pending.insert(idx, payload);
        let mut ready = Vec::new();
        while let Some(payload) = self.pending.remove(&self.next) {
            ready.push((self.next, payload));
            self.next += 1;
        }
        ready
    }
}

impl Default for Reorderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of output frames for the configured render window.
pub fn total_frames(track: &Track, fps: Fps) -> u64 {
    let (from, to) = track.render_window();
    if to <= from {
        return 0;
    }
    let duration = track.points[to - 1].time_s - track.points[from].time_s;
    fps.secs_to_frames(duration)
}

/// Render the track's configured window and stream it, in order, into
/// `sink`.
pub fn render_track(
    track: &Track,
    tiles: &TileCache,
    scaled: &ScaledTileCache,
    style: &FrameStyle,
    opts: &PipelineOpts,
    sink: &mut dyn FrameSink,
) -> TrackcastResult<RenderStats> {
    let total = total_frames(track, opts.fps);
    sink.begin(SinkConfig {
        width: style.video_width,
        height: style.video_height,
        fps: opts.fps,
    })?;
    if total == 0 {
        sink.end()?;
        return Ok(RenderStats::default());
    }

    tracing::info!(total, workers = opts.workers, "rendering frames");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.workers)
        .build()
        .map_err(|e| TrackcastError::pipeline(format!("building worker pool: {e}")))?;

    let (tx, rx) = mpsc::sync_channel::<FrameMsg>(opts.channel_capacity);
    let watchdog = opts.watchdog;

    let stats = std::thread::scope(|s| -> TrackcastResult<RenderStats> {
        // Reborrow so the sink is usable again for `end` after the scope.
        let sink = &mut *sink;
        let writer = s.spawn(move || -> TrackcastResult<RenderStats> {
            let mut stats = RenderStats {
                total_frames: total,
                ..RenderStats::default()
            };
            let mut reorderer = Reorderer::new();

            while reorderer.next_expected() < total {
                let msg = match rx.recv_timeout(watchdog) {
                    Ok(msg) => msg,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        return Err(TrackcastError::pipeline(format!(
                            "no frame arrived for {}s at frame {} of {total}",
                            watchdog.as_secs(),
                            reorderer.next_expected(),
                        )));
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        return Err(TrackcastError::pipeline(format!(
                            "workers stopped at frame {} of {total}",
                            reorderer.next_expected(),
                        )));
                    }
                };

                for (idx, payload) in reorderer.push(msg.idx, msg.payload) {
                    match payload {
                        Some(png) => {
                            sink.push_frame(FrameIndex(idx), &png)?;
                            stats.written += 1;
                        }
                        None => {
                            tracing::warn!(frame = idx, "skipping failed frame");
                            stats.failed += 1;
                        }
                    }
                }
            }

            Ok(stats)
        });

        let render_result = pool.install(|| {
            (0..total)
                .into_par_iter()
                .try_for_each_with(tx, |tx, idx| -> TrackcastResult<()> {
                    let payload = match render_frame(
                        FrameIndex(idx),
                        opts.fps,
                        track,
                        tiles,
                        scaled,
                        style,
                    )
                    .and_then(|pm| {
                        pm.encode_png().map_err(|e| {
                            TrackcastError::pipeline(format!("encoding frame {idx}: {e}"))
                        })
                    }) {
                        Ok(png) => Some(png),
                        Err(e) => {
                            tracing::warn!(frame = idx, error = %e, "frame render failed");
                            None
                        }
                    };
                    tx.send(FrameMsg { idx, payload })
                        .map_err(|_| TrackcastError::pipeline("frame writer stopped early"))
                })
        });

        let writer_result = writer
            .join()
            .map_err(|_| TrackcastError::pipeline("frame writer panicked"))?;
        // A writer failure explains any send failure, so report it first.
        let stats = writer_result?;
        render_result?;
        Ok(stats)
    })?;

    sink.end()?;

    tracing::info!(
        written = stats.written,
        failed = stats.failed,
        "render complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorderer_flushes_contiguous_runs() {
        let mut r = Reorderer::new();
        assert!(r.push(2, Some(vec![2])).is_empty());
        assert!(r.push(1, Some(vec![1])).is_empty());
        assert_eq!(r.pending_len(), 2);

        let ready = r.push(0, Some(vec![0]));
        let indices: Vec<u64> = ready.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(r.next_expected(), 3);
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn reorderer_emits_any_permutation_in_order() {
        // A fixed pseudo-random permutation of 0..50.
        let mut order: Vec<u64> = (0..50).collect();
        let mut seed = 0x9e3779b9u64;
        for i in (1..order.len()).rev() {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            order.swap(i, (seed % (i as u64 + 1)) as usize);
        }

        let mut r = Reorderer::new();
        let mut emitted = Vec::new();
        for idx in order {
            for (i, _) in r.push(idx, Some(vec![idx as u8])) {
                emitted.push(i);
            }
        }
        assert_eq!(emitted, (0..50).collect::<Vec<u64>>());
    }

    #[test]
    fn reorderer_passes_failures_through_in_order() {
        let mut r = Reorderer::new();
        r.push(1, None);
        let ready = r.push(0, Some(vec![0]));
        assert_eq!(ready.len(), 2);
        assert!(ready[0].1.is_some());
        assert!(ready[1].1.is_none());
    }

    #[test]
    fn total_frames_covers_the_window() {
        let raw = crate::telemetry::tests::straight_track(11, 1e-4);
        let track = crate::telemetry::Track::prepare(
            raw,
            &crate::telemetry::process::ProcessOpts::default(),
            &[],
        )
        .unwrap();
        assert_eq!(total_frames(&track, Fps::new(1.0).unwrap()), 10);
        assert_eq!(total_frames(&track, Fps::new(23.976).unwrap()), 239);
    }
}
