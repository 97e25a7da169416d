//! Candy-Core: Fadecandy USB session and packet-transfer SDK.
//!
//! Discovers a Fadecandy LED controller, holds one exclusive session to it
//! and writes configuration, look-up table and video frame payloads as
//! 64-byte bulk-OUT packets.
//!
//! # Architecture
//!
//! - **Protocol**: Constants, control bytes, packet framing
//! - **Payload**: Video frame and LUT buffers
//! - **Transport**: USB backend abstraction (nusb, mock)
//! - **Discovery**: Poll-based attach/detach watcher
//! - **Session**: Exclusive device session shared by all callers
//! - **Transfer**: Ordered, single-writer packet writes
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use candy_core::{
//!     Controller, DeviceFilter, DeviceSession, DeviceWatcher, NusbBackend, OpenContext,
//!     TransferExecutor,
//! };
//!
//! let backend = Arc::new(NusbBackend::new());
//! let mut watcher = DeviceWatcher::new(backend.clone(), DeviceFilter::default());
//! let device = watcher
//!     .wait_for_device(Duration::from_secs(5))
//!     .expect("no Fadecandy attached");
//!
//! let session = Arc::new(DeviceSession::new(backend));
//! session.open(&device, OpenContext::unattended()).expect("open failed");
//!
//! let controller = Controller::new(session, TransferExecutor::default());
//! controller.led_on().expect("write failed");
//! ```

pub mod config;
pub mod controller;
pub mod device;
pub mod discovery;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

// Re-exports for convenience
pub use config::{CandyConfig, ConfigError};
pub use controller::Controller;
pub use device::{DeviceDescriptor, DeviceFilter};
pub use discovery::{DeviceWatcher, WatchHandle};
pub use events::{CandyEvent, CandyObserver, NullObserver, Severity, TracingObserver};
pub use payload::{LookupTable, Rgb, VideoFrame};
pub use protocol::{ConfigValue, ControlByte, Packet};
pub use session::{ConsentPrompt, DeviceSession, OpenContext, OpenError, SessionState};
pub use transfer::{TransferError, TransferExecutor, TransferResult};
pub use transport::{
    AccessStatus, DeviceBackend, MockBackend, NusbBackend, TransportError, UsbTransport,
};
