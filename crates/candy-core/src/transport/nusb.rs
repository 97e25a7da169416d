//! nusb-based USB backend implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, Out, TransferError};
use nusb::{DeviceInfo, Endpoint, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{AccessStatus, DeviceBackend, TransportError, UsbTransport};
use crate::device::{DeviceDescriptor, interface_path, interface_segment};
use crate::protocol::constants::INSTANCE_TAG;

/// nusb-based device backend.
pub struct NusbBackend {
    instance_tag: u8,
    /// Access status observed by the last failed open, per identifier.
    last_status: Mutex<HashMap<String, AccessStatus>>,
}

impl NusbBackend {
    pub fn new() -> Self {
        Self::with_instance_tag(INSTANCE_TAG)
    }

    /// Use `tag` in the `MI_NN#<tag>` segment of synthesized identifiers.
    pub fn with_instance_tag(tag: u8) -> Self {
        Self {
            instance_tag: tag,
            last_status: Mutex::new(HashMap::new()),
        }
    }

    /// One descriptor per interface of `info`.
    fn descriptors_for(&self, info: &DeviceInfo) -> Vec<DeviceDescriptor> {
        let name = info.product_string().unwrap_or_default().to_string();
        let instance = format!(
            "{}&{}",
            info.serial_number().unwrap_or("0"),
            info.device_address()
        );

        info.interfaces()
            .map(|iface| {
                let id = interface_path(
                    info.vendor_id(),
                    info.product_id(),
                    iface.interface_number(),
                    self.instance_tag,
                    &instance,
                );
                DeviceDescriptor::new(info.vendor_id(), info.product_id(), name.clone(), id)
            })
            .collect()
    }

    /// Clear the status recorded by earlier attempts on `descriptor`.
    fn begin_attempt(&self, descriptor: &DeviceDescriptor) {
        self.remember(descriptor, AccessStatus::Unspecified);
    }

    fn remember(&self, descriptor: &DeviceDescriptor, status: AccessStatus) {
        if let Ok(mut map) = self.last_status.lock() {
            map.insert(descriptor.id().to_string(), status);
        }
    }
}

impl Default for NusbBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Interface number encoded in `MI_NN#...`.
fn interface_number(id: &str) -> Option<u8> {
    let segment = interface_segment(id)?;
    let digits = segment.strip_prefix("MI_")?.split('#').next()?;
    digits.parse().ok()
}

fn access_status_of(err: &nusb::Error) -> AccessStatus {
    match err.kind() {
        nusb::ErrorKind::PermissionDenied => AccessStatus::DeniedBySystem,
        _ => AccessStatus::Unspecified,
    }
}

impl DeviceBackend for NusbBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;

        Ok(devices.flat_map(|d| self.descriptors_for(&d)).collect())
    }

    #[instrument(level = "info", skip(self), fields(id = %descriptor.id()))]
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn UsbTransport>, TransportError> {
        self.begin_attempt(descriptor);

        let not_found = || TransportError::DeviceNotFound {
            id: descriptor.id().to_string(),
        };
        let iface_num = interface_number(descriptor.id()).ok_or_else(not_found)?;

        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?
            .find(|d| {
                self.descriptors_for(d)
                    .iter()
                    .any(|candidate| candidate.id() == descriptor.id())
            })
            .ok_or_else(not_found)?;

        info!(
            vendor_id = %format!("{:04X}", device_info.vendor_id()),
            product_id = %format!("{:04X}", device_info.product_id()),
            "Found device"
        );

        let device = device_info.open().wait().map_err(|e| {
            self.remember(descriptor, access_status_of(&e));
            TransportError::OpenFailed(e.to_string())
        })?;

        let interface = device.claim_interface(iface_num).wait().map_err(|e| {
            self.remember(descriptor, access_status_of(&e));
            TransportError::ClaimInterfaceFailed {
                interface: iface_num,
                message: e.to_string(),
            }
        })?;

        // Find the bulk OUT endpoint on the claimed interface
        let mut out_endpoint: u8 = 0;
        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == iface_num {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk
                                && ep.direction() == nusb::transfer::Direction::Out
                            {
                                out_endpoint = ep.address();
                            }
                        }
                    }
                }
            }
        }

        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        let endpoint = interface
            .endpoint::<Bulk, Out>(out_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        self.remember(descriptor, AccessStatus::Allowed);
        info!(out_ep = %format!("0x{:02X}", out_endpoint), "Device opened successfully");

        Ok(Box::new(NusbTransport {
            endpoint: Mutex::new(endpoint),
        }))
    }

    fn access_status(&self, descriptor: &DeviceDescriptor) -> AccessStatus {
        self.last_status
            .lock()
            .ok()
            .and_then(|map| map.get(descriptor.id()).copied())
            .unwrap_or_default()
    }
}

/// Open Fadecandy handle: the claimed interface's bulk-OUT endpoint.
pub struct NusbTransport {
    endpoint: Mutex<Endpoint<Bulk, Out>>,
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let mut endpoint = self
            .endpoint
            .lock()
            .map_err(|_| TransportError::WriteFailed("endpoint lock poisoned".into()))?;

        let completion = endpoint.transfer_blocking(Buffer::from(data.to_vec()), timeout);
        match completion.status {
            Ok(()) => {
                debug!(bytes_written = completion.actual_len, "Write complete");
                Ok(completion.actual_len)
            }
            Err(TransferError::Cancelled) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Write timed out");
                Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(TransferError::Disconnected) => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::WriteFailed(e.to_string())),
        }
    }

    fn is_connected(&self) -> bool {
        // nusb has no cheap liveness probe; a detached device fails the next write.
        true
    }
}
