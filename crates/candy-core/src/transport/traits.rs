//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for an open device handle and the
//! `DeviceBackend` trait for enumerating and opening devices, allowing
//! different implementations (nusb, mock, etc.).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceDescriptor;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {id}")]
    DeviceNotFound { id: String },

    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of asking the platform whether a device may be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessStatus {
    /// Nothing known about the device.
    #[default]
    Unspecified,
    Allowed,
    /// The user refused access.
    DeniedByUser,
    /// The platform refused access (permissions, missing capability).
    DeniedBySystem,
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessStatus::Unspecified => write!(f, "Unspecified"),
            AccessStatus::Allowed => write!(f, "Allowed"),
            AccessStatus::DeniedByUser => write!(f, "DeniedByUser"),
            AccessStatus::DeniedBySystem => write!(f, "DeniedBySystem"),
        }
    }
}

/// An exclusively opened device handle.
pub trait UsbTransport: Send + Sync {
    /// Write raw bytes to the bulk-OUT endpoint as one transfer.
    ///
    /// Returns the number of bytes the device accepted.
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;
}

/// Enumerates devices and opens handles to them.
pub trait DeviceBackend: Send + Sync {
    /// Snapshot of currently attached devices, in enumeration order.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Acquire an exclusive handle to `descriptor`.
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn UsbTransport>, TransportError>;

    /// Access status of `descriptor`, consulted after a failed open.
    fn access_status(&self, descriptor: &DeviceDescriptor) -> AccessStatus;
}
