//! Encoder-facing sink contract and the in-memory test sink.

use crate::foundation::core::{Fps, FrameIndex};
use crate::foundation::error::TrackcastResult;

/// Configuration provided to a [`FrameSink`] at the start of a run.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output frames-per-second.
    pub fps: Fps,
}

/// Sink contract for consuming encoded (PNG) frames in timeline order.
///
/// Ordering contract: `push_frame` is called in strictly increasing
/// `FrameIndex` order; the pipeline's writer thread enforces it.
pub trait FrameSink: Send {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> TrackcastResult<()>;
    /// Push one PNG-encoded frame in strictly increasing timeline order.
    fn push_frame(&mut self, idx: FrameIndex, png: &[u8]) -> TrackcastResult<()>;
    /// Called once after the last frame is pushed.
    fn end(&mut self) -> TrackcastResult<()>;
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<(FrameIndex, Vec<u8>)>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sink configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg.clone()
    }

    /// Borrow the captured frames, in arrival order.
    pub fn frames(&self) -> &[(FrameIndex, Vec<u8>)] {
        &self.frames
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> TrackcastResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, png: &[u8]) -> TrackcastResult<()> {
        self.frames.push((idx, png.to_vec()));
        Ok(())
    }

    fn end(&mut self) -> TrackcastResult<()> {
        Ok(())
    }
}
