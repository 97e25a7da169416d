//! Protocol constants for the Fadecandy USB LED controller.

// ============================================================================
// Device Identification
// ============================================================================

/// OpenMoko Vendor ID (Fadecandy is allocated from the OpenMoko pool)
pub const FADECANDY_VENDOR_ID: u16 = 0x1D50;

/// Fadecandy Product ID
pub const FADECANDY_PRODUCT_ID: u16 = 0x607A;

/// USB product string reported by the firmware
pub const FADECANDY_NAME: &str = "Fadecandy";

/// Interface carrying the bulk-OUT endpoint
pub const FADECANDY_INTERFACE: u8 = 0;

/// Identifier segment selecting interface 0 (`MI_00`) under instance tag 6
pub const INTERFACE_SEGMENT: &str = "MI_00#6";

/// Instance tag stamped into synthesized identifiers
pub const INSTANCE_TAG: u8 = 6;

/// Minimum number of `&`-delimited segments in a well-formed identifier
pub const MIN_IDENTIFIER_SEGMENTS: usize = 3;

// ============================================================================
// Packet Layout
// ============================================================================

/// USB bulk-OUT max transfer unit
pub const PACKET_SIZE: usize = 64;

/// Payload bytes following the control byte
pub const PACKET_PAYLOAD_SIZE: usize = PACKET_SIZE - 1;

/// Wire length of a configuration write: control byte + value
pub const CONFIG_PACKET_SIZE: usize = 2;

// ============================================================================
// Frame Buffers
// ============================================================================

/// LED grid width
pub const GRID_COLUMNS: usize = 8;

/// LED grid height
pub const GRID_ROWS: usize = 8;

/// Bytes per LED (R, G, B)
pub const BYTES_PER_LED: usize = 3;

/// Video frame size for the 8x8 grid
pub const VIDEO_FRAME_SIZE: usize = GRID_COLUMNS * GRID_ROWS * BYTES_PER_LED; // 192 bytes

/// Entries per LUT channel
pub const LUT_ENTRIES: usize = 257;

/// LUT channels (R, G, B)
pub const LUT_CHANNELS: usize = 3;

/// Serialized LUT size (16-bit entries)
pub const LUT_SIZE: usize = LUT_ENTRIES * LUT_CHANNELS * 2; // 1542 bytes

// ============================================================================
// Timing
// ============================================================================

/// Default per-packet write timeout
pub const DEFAULT_PACKET_TIMEOUT_MS: u64 = 1000;

/// Default discovery poll interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
