//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockBackend, MockTransport};
pub use self::nusb::{NusbBackend, NusbTransport};
pub use traits::{AccessStatus, DeviceBackend, TransportError, UsbTransport};
