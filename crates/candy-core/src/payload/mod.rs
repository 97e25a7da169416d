//! Payload buffers.
//!
//! Frame buffers filled by external renderers before transfer.

pub mod lut;
pub mod video;

pub use lut::{LookupTable, LookupTableError};
pub use video::{Rgb, VideoFrame, VideoFrameError, led_offset};
