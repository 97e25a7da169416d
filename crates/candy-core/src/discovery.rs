//! Device Discovery - poll-based attach/detach watcher.
//!
//! Each poll enumerates the backend, applies the [`DeviceFilter`] and diffs
//! the result against the device currently reported as attached. Only one
//! matching device is active at a time: while it stays attached, other
//! matches are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::device::{DeviceDescriptor, DeviceFilter};
use crate::events::{CandyEvent, CandyObserver, ObserverList};
use crate::protocol::constants::DEFAULT_POLL_INTERVAL_MS;
use crate::transport::{DeviceBackend, TransportError};

/// Watches a backend for matching devices.
pub struct DeviceWatcher {
    backend: Arc<dyn DeviceBackend>,
    filter: DeviceFilter,
    poll_interval: Duration,
    active: Option<DeviceDescriptor>,
    observers: ObserverList,
}

impl DeviceWatcher {
    pub fn new(backend: Arc<dyn DeviceBackend>, filter: DeviceFilter) -> Self {
        Self {
            backend,
            filter,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            active: None,
            observers: ObserverList::new(),
        }
    }

    /// Watch for `vendor_id`/`product_id` with the default name and interface.
    pub fn watch(backend: Arc<dyn DeviceBackend>, vendor_id: u16, product_id: u16) -> Self {
        Self::new(
            backend,
            DeviceFilter {
                vendor_id,
                product_id,
                ..DeviceFilter::default()
            },
        )
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Also deliver discovery events to `observer`.
    pub fn subscribe(&self, observer: Arc<dyn CandyObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn filter(&self) -> &DeviceFilter {
        &self.filter
    }

    /// Device currently reported as attached.
    pub fn active(&self) -> Option<&DeviceDescriptor> {
        self.active.as_ref()
    }

    /// Current matching devices, in enumeration order.
    pub fn matching_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        Ok(self
            .backend
            .enumerate()?
            .into_iter()
            .filter(|d| self.filter.matches(d))
            .collect())
    }

    /// Enumerate once and report what changed since the previous poll.
    #[instrument(level = "trace", skip(self))]
    pub fn poll(&mut self) -> Vec<CandyEvent> {
        let present = match self.matching_devices() {
            Ok(present) => present,
            Err(e) => {
                warn!(error = %e, "Enumeration failed, skipping poll");
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        if let Some(active) = &self.active {
            if !present.iter().any(|d| d.id() == active.id()) {
                info!(id = %active.id(), "Device removed");
                events.push(CandyEvent::DeviceRemoved {
                    id: active.id().to_string(),
                });
                self.active = None;
            } else if present.len() > 1 {
                debug!(ignored = present.len() - 1, "Ignoring additional matching devices");
            }
        }

        if self.active.is_none() {
            if let Some(first) = present.into_iter().next() {
                info!(id = %first.id(), "Device added");
                events.push(CandyEvent::DeviceAdded(first.clone()));
                self.active = Some(first);
            }
        }

        for event in &events {
            self.observers.emit(event);
        }
        events
    }

    /// Poll until a matching device is attached or `timeout` elapses.
    pub fn wait_for_device(&mut self, timeout: Duration) -> Option<DeviceDescriptor> {
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;
            self.poll();
            if let Some(active) = &self.active {
                debug!(poll_count, "Device found");
                return Some(active.clone());
            }
            if start.elapsed() >= timeout {
                return None;
            }
            thread::sleep(self.poll_interval.min(timeout.saturating_sub(start.elapsed())));
        }
    }

    /// Poll on a background thread until the returned handle is stopped or
    /// dropped.
    pub fn spawn(mut self) -> WatchHandle {
        let (sender, receiver) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                for event in self.poll() {
                    if sender.send(event).is_err() {
                        return self;
                    }
                }
                thread::park_timeout(self.poll_interval);
            }
            self
        });

        WatchHandle {
            receiver,
            stop,
            thread: Some(thread),
        }
    }
}

/// Running watcher. Dropping it stops and joins the polling thread.
pub struct WatchHandle {
    receiver: mpsc::Receiver<CandyEvent>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<DeviceWatcher>>,
}

impl WatchHandle {
    /// Block for the next event.
    pub fn recv(&self) -> Option<CandyEvent> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<CandyEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<CandyEvent> {
        self.receiver.try_recv().ok()
    }

    /// Stop polling and hand the watcher back so it can be restarted.
    ///
    /// Returns `None` if the polling thread panicked.
    pub fn stop(mut self) -> Option<DeviceWatcher> {
        self.join()
    }

    fn join(&mut self) -> Option<DeviceWatcher> {
        let thread = self.thread.take()?;
        self.stop.store(true, Ordering::SeqCst);
        thread.thread().unpark();
        thread.join().ok()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if self.join().is_some() {
            debug!("Device watcher stopped on drop");
        }
    }
}
