//! Device identity and match filtering.
//!
//! Identifiers follow the device-interface-path shape
//! `USB#VID_1D50&PID_607A&MI_00#6&...`: the third `&`-delimited segment
//! names the interface the path points at.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::constants::{
    FADECANDY_NAME, FADECANDY_PRODUCT_ID, FADECANDY_VENDOR_ID, INTERFACE_SEGMENT,
    MIN_IDENTIFIER_SEGMENTS,
};

/// Enumerated identity of a physical device candidate. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    vendor_id: u16,
    product_id: u16,
    name: String,
    id: String,
    selector: String,
}

impl DeviceDescriptor {
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        name: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            name: name.into(),
            id: id.into(),
            selector: device_selector(vendor_id, product_id),
        }
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique identifier derived from enumeration.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Selector the device was found with.
    pub fn selector(&self) -> &str {
        &self.selector
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04X}:{:04X}] {}",
            self.name, self.vendor_id, self.product_id, self.id
        )
    }
}

/// Query string selecting every device with the given VID/PID.
pub fn device_selector(vendor_id: u16, product_id: u16) -> String {
    format!("USB#VID_{:04X}&PID_{:04X}", vendor_id, product_id)
}

/// Build an identifier in device-interface-path shape.
pub fn interface_path(
    vendor_id: u16,
    product_id: u16,
    interface: u8,
    instance_tag: u8,
    instance: &str,
) -> String {
    format!(
        "{}&MI_{:02}#{}&{}",
        device_selector(vendor_id, product_id),
        interface,
        instance_tag,
        instance
    )
}

/// Third `&`-delimited segment of `id`, or `None` if the identifier is
/// malformed.
pub fn interface_segment(id: &str) -> Option<&str> {
    let segments: Vec<&str> = id.split('&').collect();
    if segments.len() < MIN_IDENTIFIER_SEGMENTS {
        return None;
    }
    Some(segments[2])
}

/// Criteria a descriptor must meet to be reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Exact device name
    pub name: String,
    /// Expected third identifier segment
    pub interface_segment: String,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            vendor_id: FADECANDY_VENDOR_ID,
            product_id: FADECANDY_PRODUCT_ID,
            name: FADECANDY_NAME.to_string(),
            interface_segment: INTERFACE_SEGMENT.to_string(),
        }
    }
}

impl DeviceFilter {
    /// Check the descriptor against all criteria.
    ///
    /// Malformed identifiers never match; they are logged and dropped.
    pub fn matches(&self, descriptor: &DeviceDescriptor) -> bool {
        if descriptor.vendor_id() != self.vendor_id || descriptor.product_id() != self.product_id {
            return false;
        }

        let Some(segment) = interface_segment(descriptor.id()) else {
            debug!(id = %descriptor.id(), "Dropping device with malformed identifier");
            return false;
        };

        descriptor.name() == self.name && segment == self.interface_segment
    }

    pub fn selector(&self) -> String {
        device_selector(self.vendor_id, self.product_id)
    }
}
