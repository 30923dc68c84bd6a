//! trackcast renders a GPS track into a time-synchronized map-overlay video.
//!
//! The flow is a straight line: decode raw points, run the telemetry
//! processing passes ([`telemetry`]), warm the tile caches ([`tiles`]),
//! render frames in parallel ([`render`], [`pipeline`]) and stream them in
//! strict index order to an external `ffmpeg` process ([`encode`]).

#![forbid(unsafe_code)]

pub mod adjust;
pub mod encode;
pub mod foundation;
pub mod geo;
pub mod pipeline;
pub mod render;
pub mod telemetry;
pub mod tiles;

pub use foundation::core::{Fps, FrameIndex};
pub use foundation::error::{TrackcastError, TrackcastResult};
pub use pipeline::{PipelineOpts, RenderStats};
pub use telemetry::{RawPoint, Track, TrackPoint};
