//! Frame sinks: the ordered-consumption contract and the ffmpeg process
//! sink behind it.

pub mod ffmpeg;
pub mod sink;
