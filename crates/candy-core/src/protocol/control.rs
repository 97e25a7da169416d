//! Control bytes and configuration values.
//!
//! The first byte of every packet tells the firmware how to interpret the
//! remaining 63 bytes.

use std::fmt;

/// Packet type selector carried in byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlByte {
    /// Per-LED RGB brightness buffer ("video array").
    VideoFrame = 0x00,
    /// Gamma / brightness correction table.
    LookUpTable = 0x40,
    /// Single-byte device configuration.
    Configuration = 0x80,
}

impl ControlByte {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a control byte read back from a packet.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::VideoFrame),
            0x40 => Some(Self::LookUpTable),
            0x80 => Some(Self::Configuration),
            _ => None,
        }
    }
}

impl fmt::Display for ControlByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlByte::VideoFrame => write!(f, "VideoFrame"),
            ControlByte::LookUpTable => write!(f, "LookUpTable"),
            ControlByte::Configuration => write!(f, "Configuration"),
        }
    }
}

/// Value byte of a configuration write.
///
/// Bit 0 disables dithering, bit 1 disables keyframe interpolation,
/// bit 2 takes manual control of the status LED and bit 3 is its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValue {
    /// Firmware defaults, LED under automatic control.
    Default,
    DisableDithering,
    DisableInterpolation,
    TurnLedOff,
    TurnLedOn,
}

impl ConfigValue {
    pub const fn as_byte(self) -> u8 {
        match self {
            ConfigValue::Default => 0x00,
            ConfigValue::DisableDithering => 0x01,
            ConfigValue::DisableInterpolation => 0x02,
            ConfigValue::TurnLedOff => 0x04,
            ConfigValue::TurnLedOn => 0x0C,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Default => write!(f, "Default"),
            ConfigValue::DisableDithering => write!(f, "DisableDithering"),
            ConfigValue::DisableInterpolation => write!(f, "DisableInterpolation"),
            ConfigValue::TurnLedOff => write!(f, "TurnLEDOff"),
            ConfigValue::TurnLedOn => write!(f, "TurnLEDOn"),
        }
    }
}
