//! Device Session - exclusive ownership of the one open Fadecandy handle.
//!
//! A single `DeviceSession` is created by the application and shared with
//! every caller through an `Arc`. It holds at most one handle at a time.
//! Opens and closes are serialized by an open guard; transfers are
//! serialized by the handle lock, so a multi-packet frame is never
//! interleaved with another writer and a close waits for an in-flight
//! transfer to finish.
//!
//! The descriptor of the last open attempt is kept across closes so the
//! session can follow the device through unplug and replug: see
//! [`DeviceSession::device_removed`] and [`DeviceSession::reconnect`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::device::DeviceDescriptor;
use crate::events::{CandyEvent, CandyObserver, ObserverList, Severity};
use crate::transport::{AccessStatus, DeviceBackend, UsbTransport};

/// Why an open attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("Access to the device was blocked by the user")]
    DeniedByUser,

    #[error("Access to the device was blocked by the system")]
    DeniedBySystem,

    #[error("Unknown error, possibly opened by another process: {message}")]
    Unavailable { message: String },
}

impl OpenError {
    /// Short classification reported alongside the failed open.
    pub fn reason(&self) -> &'static str {
        match self {
            OpenError::DeniedByUser => "blocked by user",
            OpenError::DeniedBySystem => "blocked by system/declared-capability missing",
            OpenError::Unavailable { .. } => "unknown, possibly already opened by another process",
        }
    }

    /// Access denials need external remediation; anything else may succeed
    /// on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OpenError::Unavailable { .. })
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Opening,
    Open,
    /// The last open was refused by the user or the system.
    Denied,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Opening => write!(f, "Opening"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Denied => write!(f, "Denied"),
        }
    }
}

/// Asks the user whether a device may be opened.
///
/// Runs synchronously on the thread calling [`DeviceSession::open`].
pub trait ConsentPrompt: Send + Sync {
    fn request_access(&self, descriptor: &DeviceDescriptor) -> bool;
}

/// Capabilities available to an open attempt.
#[derive(Default, Clone, Copy)]
pub struct OpenContext<'a> {
    consent: Option<&'a dyn ConsentPrompt>,
}

impl<'a> OpenContext<'a> {
    /// No interactive context; open without asking anyone.
    pub fn unattended() -> Self {
        Self { consent: None }
    }

    /// Ask `prompt` before touching the device.
    pub fn with_consent(prompt: &'a dyn ConsentPrompt) -> Self {
        Self {
            consent: Some(prompt),
        }
    }
}

/// The slot guarded by the handle lock. `handle.is_some()` iff `Open`.
#[derive(Default)]
struct Slot {
    state: SessionState,
    descriptor: Option<DeviceDescriptor>,
    handle: Option<Box<dyn UsbTransport>>,
    /// Target of the last open attempt; survives `close`.
    last_descriptor: Option<DeviceDescriptor>,
}

/// Exclusive device session shared by all callers.
pub struct DeviceSession {
    backend: Arc<dyn DeviceBackend>,
    observers: ObserverList,
    open_guard: Mutex<()>,
    slot: Mutex<Slot>,
}

impl DeviceSession {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            observers: ObserverList::new(),
            open_guard: Mutex::new(()),
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Register an observer for connection and notice events.
    pub fn subscribe(&self, observer: Arc<dyn CandyObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    pub fn state(&self) -> SessionState {
        self.lock_slot().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Descriptor bound by the last successful open, while open.
    pub fn current_descriptor(&self) -> Option<DeviceDescriptor> {
        self.lock_slot().descriptor.clone()
    }

    /// Descriptor of the last open attempt, kept after close for reconnects.
    pub fn last_descriptor(&self) -> Option<DeviceDescriptor> {
        self.lock_slot().last_descriptor.clone()
    }

    /// Drop the reconnect target so later attaches are ignored.
    pub fn forget(&self) {
        self.lock_slot().last_descriptor = None;
    }

    /// Run `f` with exclusive access to the open handle.
    ///
    /// Returns `None` when the session is not open. Other writers and
    /// `close` block until `f` returns.
    pub fn with_handle<R>(&self, f: impl FnOnce(&dyn UsbTransport) -> R) -> Option<R> {
        let slot = self.lock_slot();
        slot.handle.as_deref().map(f)
    }

    /// Open `descriptor` exclusively, replacing any handle already open.
    #[instrument(skip(self, context), fields(id = %descriptor.id()))]
    pub fn open(
        &self,
        descriptor: &DeviceDescriptor,
        context: OpenContext<'_>,
    ) -> Result<(), OpenError> {
        let _guard = self.lock_open_guard();

        self.close_locked();
        {
            let mut slot = self.lock_slot();
            slot.state = SessionState::Opening;
            slot.last_descriptor = Some(descriptor.clone());
        }

        let result = self.acquire(descriptor, context);
        match result {
            Ok(handle) => {
                {
                    let mut slot = self.lock_slot();
                    slot.handle = Some(handle);
                    slot.descriptor = Some(descriptor.clone());
                    slot.state = SessionState::Open;
                }
                info!(id = %descriptor.id(), "Device opened");
                self.observers.emit(&CandyEvent::Connected(descriptor.clone()));
                self.notify_device(descriptor, "Device opened", Severity::Status);
                Ok(())
            }
            Err(err) => {
                self.lock_slot().state = match err {
                    OpenError::DeniedByUser | OpenError::DeniedBySystem => SessionState::Denied,
                    OpenError::Unavailable { .. } => SessionState::Closed,
                };
                warn!(id = %descriptor.id(), reason = err.reason(), "Device open failed");
                self.notify_device(descriptor, &err.to_string(), Severity::Error);
                Err(err)
            }
        }
    }

    /// Release the handle if open. A no-op on a session that is not open.
    pub fn close(&self) {
        let _guard = self.lock_open_guard();
        self.close_locked();
    }

    /// Close the session if `id` is the bound device.
    ///
    /// Call with the id of a discovery `DeviceRemoved` event. Returns whether
    /// the session was closed. The reconnect target is kept.
    pub fn device_removed(&self, id: &str) -> bool {
        let _guard = self.lock_open_guard();
        let bound = {
            let slot = self.lock_slot();
            slot.state == SessionState::Open
                && slot.descriptor.as_ref().is_some_and(|d| d.id() == id)
        };
        if bound {
            warn!(id, "Bound device was removed");
            self.close_locked();
        }
        bound
    }

    /// Reopen after the reconnect target shows up again.
    ///
    /// Call with the descriptor of a discovery `DeviceAdded` event. Returns
    /// `None` without touching the device when the session is already open,
    /// the last open was denied, nothing was opened before, or `added` has a
    /// different selector than the last target.
    pub fn reconnect(
        &self,
        added: &DeviceDescriptor,
        context: OpenContext<'_>,
    ) -> Option<Result<(), OpenError>> {
        let last = {
            let slot = self.lock_slot();
            match slot.state {
                SessionState::Open | SessionState::Denied => return None,
                SessionState::Closed | SessionState::Opening => {}
            }
            slot.last_descriptor.clone()?
        };
        if last.selector() != added.selector() {
            return None;
        }

        info!(id = %added.id(), "Reconnecting to device");
        Some(self.open(added, context))
    }

    /// Report a message through the notify sink, tagged with the bound device.
    pub fn notify(&self, message: &str, severity: Severity) {
        let device_id = self.current_descriptor().map(|d| d.id().to_string());
        self.observers.emit(&CandyEvent::Notice {
            message: message.to_string(),
            device_id,
            severity,
        });
    }

    fn notify_device(&self, descriptor: &DeviceDescriptor, message: &str, severity: Severity) {
        self.observers.emit(&CandyEvent::Notice {
            message: message.to_string(),
            device_id: Some(descriptor.id().to_string()),
            severity,
        });
    }

    /// Ask for consent, then open through the backend and classify failures.
    fn acquire(
        &self,
        descriptor: &DeviceDescriptor,
        context: OpenContext<'_>,
    ) -> Result<Box<dyn UsbTransport>, OpenError> {
        if let Some(prompt) = context.consent {
            if !prompt.request_access(descriptor) {
                return Err(OpenError::DeniedByUser);
            }
        }

        self.backend.open(descriptor).map_err(|e| {
            match self.backend.access_status(descriptor) {
                AccessStatus::DeniedByUser => OpenError::DeniedByUser,
                AccessStatus::DeniedBySystem => OpenError::DeniedBySystem,
                AccessStatus::Allowed | AccessStatus::Unspecified => OpenError::Unavailable {
                    message: e.to_string(),
                },
            }
        })
    }

    /// Close while holding the open guard.
    ///
    /// The handle leaves the slot before `Closing` is emitted, so no writer
    /// can reach it once observers hear about the close. It is released after
    /// they return.
    fn close_locked(&self) {
        let (descriptor, handle) = {
            let mut slot = self.lock_slot();
            let descriptor = match (slot.state, slot.descriptor.take()) {
                (SessionState::Open, Some(descriptor)) => descriptor,
                (_, descriptor) => {
                    slot.descriptor = descriptor;
                    return;
                }
            };
            slot.state = SessionState::Closed;
            (descriptor, slot.handle.take())
        };

        self.observers.emit(&CandyEvent::Closing(descriptor.clone()));

        drop(handle);
        info!(id = %descriptor.id(), "Device closed");
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        // A panicking observer must not brick the session.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_open_guard(&self) -> MutexGuard<'_, ()> {
        self.open_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::transport::MockBackend;

    fn device(tag: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(
            0x1D50,
            0x607A,
            "Fadecandy",
            format!("USB#VID_1D50&PID_607A&MI_00#6&{tag}"),
        )
    }

    fn setup() -> (Arc<MockBackend>, DeviceSession, Arc<RecordingObserver>) {
        let backend = Arc::new(MockBackend::new());
        backend.attach(device("A"));
        backend.attach(device("B"));
        let session = DeviceSession::new(backend.clone());
        let recorder = Arc::new(RecordingObserver::new());
        session.subscribe(recorder.clone());
        (backend, session, recorder)
    }

    fn transitions(events: Vec<CandyEvent>) -> Vec<CandyEvent> {
        events
            .into_iter()
            .filter(|e| !matches!(e, CandyEvent::Notice { .. }))
            .collect()
    }

    struct Refuse;

    impl ConsentPrompt for Refuse {
        fn request_access(&self, _descriptor: &DeviceDescriptor) -> bool {
            false
        }
    }

    #[test]
    fn test_open_binds_descriptor() {
        let (backend, session, recorder) = setup();
        assert_eq!(session.state(), SessionState::Closed);

        session.open(&device("A"), OpenContext::unattended()).unwrap();

        assert!(session.is_open());
        assert_eq!(session.current_descriptor(), Some(device("A")));
        assert_eq!(backend.live_handles(), 1);
        assert_eq!(
            transitions(recorder.drain_events()),
            vec![CandyEvent::Connected(device("A"))]
        );
    }

    #[test]
    fn test_reopen_replaces_handle() {
        let (backend, session, recorder) = setup();

        session.open(&device("A"), OpenContext::unattended()).unwrap();
        session.open(&device("B"), OpenContext::unattended()).unwrap();

        assert_eq!(backend.live_handles(), 1);
        assert_eq!(backend.open_count(), 2);
        assert_eq!(session.current_descriptor(), Some(device("B")));
        assert_eq!(
            transitions(recorder.drain_events()),
            vec![
                CandyEvent::Connected(device("A")),
                CandyEvent::Closing(device("A")),
                CandyEvent::Connected(device("B")),
            ]
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let (backend, session, recorder) = setup();

        session.close();
        assert!(recorder.drain_events().is_empty());

        session.open(&device("A"), OpenContext::unattended()).unwrap();
        recorder.drain_events();

        session.close();
        session.close();
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            recorder.drain_events(),
            vec![CandyEvent::Closing(device("A"))]
        );
    }

    #[test]
    fn test_denied_by_user() {
        let (backend, session, _) = setup();
        backend.refuse(device("A").id(), AccessStatus::DeniedByUser);

        let err = session
            .open(&device("A"), OpenContext::unattended())
            .unwrap_err();
        assert_eq!(err, OpenError::DeniedByUser);
        assert_eq!(err.reason(), "blocked by user");
        assert!(!err.is_retryable());
        assert_eq!(session.state(), SessionState::Denied);
        assert!(session.with_handle(|_| ()).is_none());
    }

    #[test]
    fn test_denied_by_system() {
        let (backend, session, _) = setup();
        backend.refuse(device("A").id(), AccessStatus::DeniedBySystem);

        let err = session
            .open(&device("A"), OpenContext::unattended())
            .unwrap_err();
        assert_eq!(err, OpenError::DeniedBySystem);
        assert!(err.reason().starts_with("blocked by system"));
        assert!(!session.is_open());
    }

    #[test]
    fn test_unknown_failure() {
        let (backend, session, recorder) = setup();
        backend.refuse(device("A").id(), AccessStatus::Unspecified);

        let err = session
            .open(&device("A"), OpenContext::unattended())
            .unwrap_err();
        assert!(matches!(err, OpenError::Unavailable { .. }));
        assert!(err.reason().starts_with("unknown"));
        assert!(err.is_retryable());
        assert_eq!(session.state(), SessionState::Closed);

        let events = recorder.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            CandyEvent::Notice {
                severity: Severity::Error,
                ..
            }
        )));
    }

    #[test]
    fn test_failed_reopen_leaves_session_closed() {
        let (backend, session, recorder) = setup();
        session.open(&device("A"), OpenContext::unattended()).unwrap();
        backend.refuse(device("B").id(), AccessStatus::Unspecified);

        assert!(session.open(&device("B"), OpenContext::unattended()).is_err());

        assert_eq!(backend.live_handles(), 0);
        assert_eq!(session.current_descriptor(), None);
        assert_eq!(
            transitions(recorder.drain_events()),
            vec![
                CandyEvent::Connected(device("A")),
                CandyEvent::Closing(device("A")),
            ]
        );
    }

    #[test]
    fn test_consent_refused() {
        let (backend, session, _) = setup();

        let err = session
            .open(&device("A"), OpenContext::with_consent(&Refuse))
            .unwrap_err();
        assert_eq!(err, OpenError::DeniedByUser);
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn test_concurrent_opens_leave_one_handle() {
        let (backend, session, _) = setup();
        let session = Arc::new(session);

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let session = Arc::clone(&session);
                let tag = if i % 2 == 0 { "A" } else { "B" };
                std::thread::spawn(move || {
                    session.open(&device(tag), OpenContext::unattended()).unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(session.is_open());
        assert_eq!(backend.live_handles(), 1);
        assert_eq!(backend.open_count(), 8);
    }

    /// Records what the session looks like from inside callbacks.
    #[derive(Default)]
    struct Inspector {
        session: Mutex<std::sync::Weak<DeviceSession>>,
        connected_on: Mutex<Option<std::thread::ThreadId>>,
        handle_during_closing: Mutex<Option<bool>>,
    }

    impl CandyObserver for Inspector {
        fn on_event(&self, event: &CandyEvent) {
            match event {
                CandyEvent::Connected(_) => {
                    *self.connected_on.lock().unwrap() = Some(std::thread::current().id());
                }
                CandyEvent::Closing(_) => {
                    let session = self.session.lock().unwrap().upgrade();
                    let reachable = session.is_some_and(|s| s.with_handle(|_| ()).is_some());
                    *self.handle_during_closing.lock().unwrap() = Some(reachable);
                }
                _ => {}
            }
        }
    }

    fn inspected() -> (Arc<MockBackend>, Arc<DeviceSession>, Arc<Inspector>) {
        let (backend, session, _) = setup();
        let session = Arc::new(session);
        let inspector = Arc::new(Inspector::default());
        *inspector.session.lock().unwrap() = Arc::downgrade(&session);
        session.subscribe(inspector.clone());
        (backend, session, inspector)
    }

    #[test]
    fn test_connected_runs_on_opening_thread() {
        let (_, session, inspector) = inspected();

        let opener = Arc::clone(&session);
        let opener_thread = std::thread::spawn(move || {
            opener.open(&device("A"), OpenContext::unattended()).unwrap();
            std::thread::current().id()
        })
        .join()
        .unwrap();

        assert_eq!(*inspector.connected_on.lock().unwrap(), Some(opener_thread));
        assert_ne!(opener_thread, std::thread::current().id());
    }

    /// Grants access and records how many backend opens happened before it ran.
    struct CountingConsent {
        backend: Arc<MockBackend>,
        opens_seen: Mutex<Option<usize>>,
    }

    impl ConsentPrompt for CountingConsent {
        fn request_access(&self, _descriptor: &DeviceDescriptor) -> bool {
            *self.opens_seen.lock().unwrap() = Some(self.backend.open_count());
            true
        }
    }

    #[test]
    fn test_consent_asked_before_backend_open() {
        let (backend, session, _) = setup();
        let consent = CountingConsent {
            backend: backend.clone(),
            opens_seen: Mutex::new(None),
        };

        session
            .open(&device("A"), OpenContext::with_consent(&consent))
            .unwrap();

        assert_eq!(*consent.opens_seen.lock().unwrap(), Some(0));
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn test_handle_unreachable_once_closing_fires() {
        let (backend, session, inspector) = inspected();
        session.open(&device("A"), OpenContext::unattended()).unwrap();

        session.close();

        assert_eq!(*inspector.handle_during_closing.lock().unwrap(), Some(false));
        assert_eq!(backend.live_handles(), 0);
    }

    #[test]
    fn test_removal_closes_bound_device() {
        let (backend, session, recorder) = setup();
        session.open(&device("A"), OpenContext::unattended()).unwrap();
        recorder.drain_events();

        let mut watcher = crate::discovery::DeviceWatcher::new(
            backend.clone() as Arc<dyn DeviceBackend>,
            crate::device::DeviceFilter::default(),
        );
        watcher.poll();
        backend.detach(device("A").id());

        for event in watcher.poll() {
            if let CandyEvent::DeviceRemoved { id } = event {
                assert!(session.device_removed(&id));
            }
        }

        assert!(!session.is_open());
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(session.last_descriptor(), Some(device("A")));
        assert_eq!(
            transitions(recorder.drain_events()),
            vec![CandyEvent::Closing(device("A"))]
        );
    }

    #[test]
    fn test_removal_of_other_device_is_ignored() {
        let (backend, session, _) = setup();
        session.open(&device("A"), OpenContext::unattended()).unwrap();

        assert!(!session.device_removed(device("B").id()));
        assert!(session.is_open());
        assert_eq!(backend.live_handles(), 1);
    }

    #[test]
    fn test_reconnect_after_replug() {
        let (backend, session, recorder) = setup();
        session.open(&device("A"), OpenContext::unattended()).unwrap();

        // Open session: nothing to do
        assert!(session.reconnect(&device("A"), OpenContext::unattended()).is_none());

        backend.detach(device("A").id());
        assert!(session.device_removed(device("A").id()));
        recorder.drain_events();

        backend.attach(device("A"));
        let outcome = session.reconnect(&device("A"), OpenContext::unattended());
        assert_eq!(outcome, Some(Ok(())));
        assert!(session.is_open());
        assert_eq!(backend.open_count(), 2);
        assert_eq!(
            transitions(recorder.drain_events()),
            vec![CandyEvent::Connected(device("A"))]
        );
    }

    #[test]
    fn test_reconnect_requires_matching_target() {
        let (backend, session, _) = setup();

        // Never opened
        assert!(session.reconnect(&device("A"), OpenContext::unattended()).is_none());

        session.open(&device("A"), OpenContext::unattended()).unwrap();
        session.close();

        let other = DeviceDescriptor::new(
            0x1D50,
            0x6089,
            "Fadecandy",
            "USB#VID_1D50&PID_6089&MI_00#6&A",
        );
        assert!(session.reconnect(&other, OpenContext::unattended()).is_none());

        session.forget();
        assert!(session.reconnect(&device("B"), OpenContext::unattended()).is_none());
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn test_no_reconnect_after_denial() {
        let (backend, session, _) = setup();
        backend.refuse(device("A").id(), AccessStatus::DeniedBySystem);
        assert!(session.open(&device("A"), OpenContext::unattended()).is_err());

        backend.allow(device("A").id());
        assert!(session.reconnect(&device("A"), OpenContext::unattended()).is_none());
        assert_eq!(session.state(), SessionState::Denied);
    }
}
