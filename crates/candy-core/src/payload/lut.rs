//! Color lookup table.
//!
//! Three channels of 257 16-bit entries, mapping 8-bit input brightness
//! (plus one interpolation endpoint) to 16-bit output. Serialized
//! little-endian, channel after channel.

use byteorder::{LittleEndian, WriteBytesExt};
use thiserror::Error;

use crate::protocol::constants::{LUT_CHANNELS, LUT_ENTRIES, LUT_SIZE};

#[derive(Error, Debug)]
pub enum LookupTableError {
    #[error("Invalid gamma {0}: must be finite and positive")]
    InvalidGamma(f64),
    #[error("Channel {0} out of range")]
    ChannelOutOfRange(usize),
}

/// Per-channel brightness correction table sent with the `LookUpTable`
/// control byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    channels: [[u16; LUT_ENTRIES]; LUT_CHANNELS],
}

impl LookupTable {
    /// Identity mapping; this is the table the device boots with.
    pub fn linear() -> Self {
        let mut entries = [0u16; LUT_ENTRIES];
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = (i * 257).min(u16::MAX as usize) as u16;
        }
        Self {
            channels: [entries; LUT_CHANNELS],
        }
    }

    /// Power-law curve `out = in^gamma`, identical on all channels.
    pub fn with_gamma(gamma: f64) -> Result<Self, LookupTableError> {
        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(LookupTableError::InvalidGamma(gamma));
        }

        let mut entries = [0u16; LUT_ENTRIES];
        let last = (LUT_ENTRIES - 1) as f64;
        for (i, entry) in entries.iter_mut().enumerate() {
            let x = i as f64 / last;
            *entry = (x.powf(gamma) * f64::from(u16::MAX)).round() as u16;
        }
        Ok(Self {
            channels: [entries; LUT_CHANNELS],
        })
    }

    pub fn channel(&self, index: usize) -> Result<&[u16; LUT_ENTRIES], LookupTableError> {
        self.channels
            .get(index)
            .ok_or(LookupTableError::ChannelOutOfRange(index))
    }

    pub fn channel_mut(
        &mut self,
        index: usize,
    ) -> Result<&mut [u16; LUT_ENTRIES], LookupTableError> {
        self.channels
            .get_mut(index)
            .ok_or(LookupTableError::ChannelOutOfRange(index))
    }

    /// Wire representation (1542 bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LUT_SIZE);
        for channel in &self.channels {
            for &entry in channel {
                // Writing into a Vec cannot fail.
                buf.write_u16::<LittleEndian>(entry).unwrap();
            }
        }
        buf
    }
}

impl Default for LookupTable {
    fn default() -> Self {
        Self::linear()
    }
}
