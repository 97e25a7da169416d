//! Video frame buffer for the 8x8 RGB grid.

use thiserror::Error;

use crate::protocol::constants::{BYTES_PER_LED, GRID_COLUMNS, GRID_ROWS, VIDEO_FRAME_SIZE};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VideoFrameError {
    #[error("LED ({col}, {row}) outside the 8x8 grid")]
    OutOfRange { col: usize, row: usize },
    #[error("Frame size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// One LED's brightness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn white(level: u8) -> Self {
        Self::new(level, level, level)
    }
}

/// Byte offset of the LED at (`col`, `row`). Row-major, three bytes per LED.
pub fn led_offset(col: usize, row: usize) -> Result<usize, VideoFrameError> {
    if col >= GRID_COLUMNS || row >= GRID_ROWS {
        return Err(VideoFrameError::OutOfRange { col, row });
    }
    Ok((row * GRID_COLUMNS + col) * BYTES_PER_LED)
}

/// Per-LED RGB buffer sent with the `VideoFrame` control byte.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    data: [u8; VIDEO_FRAME_SIZE],
}

impl VideoFrame {
    /// All LEDs off.
    pub fn blank() -> Self {
        Self {
            data: [0; VIDEO_FRAME_SIZE],
        }
    }

    /// Wrap an externally rendered buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VideoFrameError> {
        let data = bytes
            .try_into()
            .map_err(|_| VideoFrameError::SizeMismatch {
                expected: VIDEO_FRAME_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self { data })
    }

    pub fn set_pixel(
        &mut self,
        col: usize,
        row: usize,
        color: Rgb,
    ) -> Result<(), VideoFrameError> {
        let offset = led_offset(col, row)?;
        self.data[offset] = color.r;
        self.data[offset + 1] = color.g;
        self.data[offset + 2] = color.b;
        Ok(())
    }

    pub fn pixel(&self, col: usize, row: usize) -> Result<Rgb, VideoFrameError> {
        let offset = led_offset(col, row)?;
        Ok(Rgb::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ))
    }

    pub fn fill(&mut self, color: Rgb) {
        for led in self.data.chunks_exact_mut(BYTES_PER_LED) {
            led.copy_from_slice(&[color.r, color.g, color.b]);
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Default for VideoFrame {
    fn default() -> Self {
        Self::blank()
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self
            .data
            .chunks_exact(BYTES_PER_LED)
            .filter(|led| led.iter().any(|&b| b != 0))
            .count();
        write!(
            f,
            "VideoFrame({} of {} LEDs lit)",
            lit,
            GRID_COLUMNS * GRID_ROWS
        )
    }
}
