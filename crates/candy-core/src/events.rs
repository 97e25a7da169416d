//! Event system for UI decoupling.
//!
//! Allows CLI/GUI layers to subscribe to session and discovery events
//! without tight coupling to the core logic. The core never renders
//! anything itself.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::device::DeviceDescriptor;

/// Severity of a [`CandyEvent::Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Status,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Status => write!(f, "Status"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by discovery and the device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandyEvent {
    /// A matching device was attached.
    DeviceAdded(DeviceDescriptor),
    /// The active matching device was detached.
    DeviceRemoved { id: String },
    /// The session transitioned into `Open`.
    Connected(DeviceDescriptor),
    /// The session is about to leave `Open`.
    Closing(DeviceDescriptor),
    /// Outcome report for the UI layer.
    Notice {
        message: String,
        device_id: Option<String>,
        severity: Severity,
    },
}

/// Observer trait for receiving events.
///
/// Implement this trait in your UI layer to receive updates. Callbacks run
/// synchronously on the thread that caused the event.
pub trait CandyObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &CandyEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl CandyObserver for NullObserver {
    fn on_event(&self, _event: &CandyEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl CandyObserver for TracingObserver {
    fn on_event(&self, event: &CandyEvent) {
        match event {
            CandyEvent::DeviceAdded(descriptor) => {
                tracing::info!(id = %descriptor.id(), name = %descriptor.name(), "Device added");
            }
            CandyEvent::DeviceRemoved { id } => {
                tracing::warn!(id = %id, "Device removed");
            }
            CandyEvent::Connected(descriptor) => {
                tracing::info!(id = %descriptor.id(), "Connected to device");
            }
            CandyEvent::Closing(descriptor) => {
                tracing::info!(id = %descriptor.id(), "Closing device");
            }
            CandyEvent::Notice {
                message,
                device_id,
                severity,
            } => {
                let device = device_id.as_deref().unwrap_or("-");
                match severity {
                    Severity::Status => tracing::info!(device = %device, "{}", message),
                    Severity::Error => tracing::error!(device = %device, "{}", message),
                }
            }
        }
    }
}

/// Ordered set of observers notified one after another.
#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<Arc<dyn CandyObserver>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn CandyObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer in subscription order.
    pub fn emit(&self, event: &CandyEvent) {
        // Snapshot so observers may subscribe others from inside a callback.
        let observers: Vec<_> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(_) => return,
        };
        for observer in observers {
            observer.on_event(event);
        }
    }
}

impl CandyObserver for ObserverList {
    fn on_event(&self, event: &CandyEvent) {
        self.emit(event);
    }
}

/// Observer that records every event; handy in tests and simple UIs.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<CandyEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all recorded events, oldest first.
    pub fn drain_events(&self) -> Vec<CandyEvent> {
        self.events
            .lock()
            .map(|mut events| events.drain(..).collect())
            .unwrap_or_default()
    }
}

impl CandyObserver for RecordingObserver {
    fn on_event(&self, event: &CandyEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
