//! CPU frame rendering: drawing primitives and per-frame composition.

pub mod draw;
pub mod frame;
