//! Protocol module - Fadecandy wire definitions.

pub mod constants;
pub mod control;
pub mod packet;

pub use constants::*;
pub use control::{ConfigValue, ControlByte};
pub use packet::{Packet, config_packet, frame, frame_raw, packet_count, reassemble};
