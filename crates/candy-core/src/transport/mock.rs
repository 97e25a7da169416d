//! Mock USB backend for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{AccessStatus, DeviceBackend, TransportError, UsbTransport};
use crate::device::DeviceDescriptor;

/// State shared between the backend and every handle it opened.
#[derive(Default)]
struct Shared {
    /// Captured writes, across all handles.
    write_log: Mutex<Vec<Vec<u8>>>,
    /// Handles currently alive.
    live_handles: AtomicUsize,
    /// Successful opens so far.
    open_count: AtomicUsize,
    /// Whether the device is "connected".
    disconnected: AtomicBool,
    /// Fail the write with this index (counted from the last arm).
    fail_write_at: Mutex<Option<usize>>,
    writes_since_arm: AtomicUsize,
    /// Cap on bytes accepted per write.
    write_limit: Mutex<Option<usize>>,
}

/// Mock backend for unit testing session and transfer logic.
pub struct MockBackend {
    devices: Mutex<Vec<DeviceDescriptor>>,
    /// Devices whose open fails, with the access status reported afterwards.
    refusals: Mutex<HashMap<String, AccessStatus>>,
    enumeration_broken: AtomicBool,
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            refusals: Mutex::new(HashMap::new()),
            enumeration_broken: AtomicBool::new(false),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Simulate a physical attach.
    pub fn attach(&self, descriptor: DeviceDescriptor) {
        self.devices.lock().unwrap().push(descriptor);
    }

    /// Simulate a physical detach.
    pub fn detach(&self, id: &str) {
        self.devices.lock().unwrap().retain(|d| d.id() != id);
    }

    /// Make opens of `id` fail; `status` is what the access query reports.
    pub fn refuse(&self, id: &str, status: AccessStatus) {
        self.refusals.lock().unwrap().insert(id.to_string(), status);
    }

    /// Let `id` open again.
    pub fn allow(&self, id: &str) {
        self.refusals.lock().unwrap().remove(id);
    }

    /// Make `enumerate` fail until cleared.
    pub fn break_enumeration(&self, broken: bool) {
        self.enumeration_broken.store(broken, Ordering::SeqCst);
    }

    /// Fail the `index`-th write from now on (0-based).
    pub fn fail_write_at(&self, index: usize) {
        *self.shared.fail_write_at.lock().unwrap() = Some(index);
        self.shared.writes_since_arm.store(0, Ordering::SeqCst);
    }

    /// Accept at most `limit` bytes per write.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        *self.shared.write_limit.lock().unwrap() = limit;
    }

    /// Simulate the device dropping off the bus.
    pub fn disconnect(&self) {
        self.shared.disconnected.store(true, Ordering::SeqCst);
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        self.shared.disconnected.store(false, Ordering::SeqCst);
    }

    /// Get all captured writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.shared.write_log.lock().unwrap().clear();
    }

    /// Handles opened and not yet dropped.
    pub fn live_handles(&self) -> usize {
        self.shared.live_handles.load(Ordering::SeqCst)
    }

    /// Successful opens since creation.
    pub fn open_count(&self) -> usize {
        self.shared.open_count.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for MockBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        if self.enumeration_broken.load(Ordering::SeqCst) {
            return Err(TransportError::EnumerationFailed("mock enumeration failure".into()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn UsbTransport>, TransportError> {
        if self.refusals.lock().unwrap().contains_key(descriptor.id()) {
            return Err(TransportError::OpenFailed(format!("mock refused {}", descriptor.id())));
        }
        if !self.devices.lock().unwrap().iter().any(|d| d.id() == descriptor.id()) {
            return Err(TransportError::DeviceNotFound {
                id: descriptor.id().to_string(),
            });
        }

        self.shared.live_handles.fetch_add(1, Ordering::SeqCst);
        self.shared.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn access_status(&self, descriptor: &DeviceDescriptor) -> AccessStatus {
        self.refusals
            .lock()
            .unwrap()
            .get(descriptor.id())
            .copied()
            .unwrap_or(AccessStatus::Allowed)
    }
}

/// Handle produced by [`MockBackend::open`].
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl UsbTransport for MockTransport {
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        if self.shared.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        let index = self.shared.writes_since_arm.fetch_add(1, Ordering::SeqCst);
        if *self.shared.fail_write_at.lock().unwrap() == Some(index) {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        let accepted = match *self.shared.write_limit.lock().unwrap() {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };
        self.shared
            .write_log
            .lock()
            .unwrap()
            .push(data[..accepted].to_vec());
        Ok(accepted)
    }

    fn is_connected(&self) -> bool {
        !self.shared.disconnected.load(Ordering::SeqCst)
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.shared.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn device() -> DeviceDescriptor {
        DeviceDescriptor::new(0x1D50, 0x607A, "Fadecandy", "USB#VID_1D50&PID_607A&MI_00#6&A")
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockBackend::new();
        mock.attach(device());
        let handle = mock.open(&device()).unwrap();

        handle.write(b"Hello", TIMEOUT).unwrap();
        handle.write(b"World", TIMEOUT).unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_handle_tracking() {
        let mock = MockBackend::new();
        mock.attach(device());

        let a = mock.open(&device()).unwrap();
        assert_eq!(mock.live_handles(), 1);
        drop(a);
        assert_eq!(mock.live_handles(), 0);
        assert_eq!(mock.open_count(), 1);
    }

    #[test]
    fn test_mock_refusal() {
        let mock = MockBackend::new();
        mock.attach(device());
        mock.refuse(device().id(), AccessStatus::DeniedBySystem);

        assert!(mock.open(&device()).is_err());
        assert_eq!(mock.access_status(&device()), AccessStatus::DeniedBySystem);

        mock.allow(device().id());
        assert!(mock.open(&device()).is_ok());
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockBackend::new();
        mock.attach(device());
        let handle = mock.open(&device()).unwrap();
        assert!(handle.is_connected());

        mock.disconnect();
        assert!(!handle.is_connected());
        assert!(handle.write(b"test", TIMEOUT).is_err());
    }

    #[test]
    fn test_mock_fail_write_at() {
        let mock = MockBackend::new();
        mock.attach(device());
        let handle = mock.open(&device()).unwrap();

        mock.fail_write_at(1);
        assert!(handle.write(b"a", TIMEOUT).is_ok());
        assert!(matches!(
            handle.write(b"b", TIMEOUT),
            Err(TransportError::Timeout { timeout_ms: 100 })
        ));
        assert!(handle.write(b"c", TIMEOUT).is_ok());
    }
}
