//! Transfer Executor - writes framed packets through the session's handle.
//!
//! One transport write per packet, strictly in order. The first failure
//! ends the write; there is no retry or reconnect at this layer.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::events::Severity;
use crate::protocol::Packet;
use crate::protocol::constants::DEFAULT_PACKET_TIMEOUT_MS;
use crate::session::DeviceSession;
use crate::transport::{TransportError, UsbTransport};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Device session is not open")]
    NotOpen,

    #[error("Packet {packet_index} failed after {bytes_written} bytes: {source}")]
    Failed {
        bytes_written: usize,
        packet_index: usize,
        #[source]
        source: TransportError,
    },
}

impl TransferError {
    /// Bytes accepted before the failure.
    pub fn bytes_written(&self) -> usize {
        match self {
            TransferError::NotOpen => 0,
            TransferError::Failed { bytes_written, .. } => *bytes_written,
        }
    }
}

/// Total bytes written, or the classified failure.
pub type TransferResult = Result<usize, TransferError>;

/// Progress of a single `write` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteState {
    #[default]
    Idle,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteState::Idle => write!(f, "Idle"),
            WriteState::Writing => write!(f, "Writing"),
            WriteState::Done => write!(f, "Done"),
            WriteState::Failed => write!(f, "Failed"),
        }
    }
}

/// Writes packet sequences to the bulk-OUT endpoint of an open session.
pub struct TransferExecutor {
    packet_timeout: Duration,
    state: Mutex<WriteState>,
}

impl TransferExecutor {
    pub fn new(packet_timeout: Duration) -> Self {
        Self {
            packet_timeout,
            state: Mutex::new(WriteState::Idle),
        }
    }

    pub fn packet_timeout(&self) -> Duration {
        self.packet_timeout
    }

    /// State reached by the most recent `write` on this executor.
    ///
    /// Writes that reach the device move through `Idle`, `Writing` and
    /// `Done`/`Failed` under the session's handle lock, so concurrent calls
    /// never mix their transitions. A call rejected with `NotOpen` records
    /// `Failed` outside that lock.
    pub fn last_state(&self) -> WriteState {
        self.state.lock().map(|s| *s).unwrap_or_default()
    }

    fn goto_state(&self, new_state: WriteState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = %*state, to = %new_state, "Write state transition");
            *state = new_state;
        }
    }

    /// Write `packets` in order through `session`'s open handle.
    ///
    /// Holds the session's handle for the whole sequence so no other
    /// writer can interleave packets. Short writes are reported through the
    /// byte count, not as errors.
    #[instrument(skip(self, session, packets), fields(packets = packets.len()))]
    pub fn write(&self, session: &DeviceSession, packets: &[Packet]) -> TransferResult {
        let outcome = session.with_handle(|handle| {
            self.goto_state(WriteState::Idle);
            self.goto_state(WriteState::Writing);
            let result = self.write_packets(handle, packets);
            self.goto_state(if result.is_ok() {
                WriteState::Done
            } else {
                WriteState::Failed
            });
            result
        });

        // Report only after the handle lock is released.
        let result = outcome.unwrap_or_else(|| {
            self.goto_state(WriteState::Failed);
            Err(TransferError::NotOpen)
        });
        match &result {
            Ok(bytes_written) => {
                debug!(bytes_written, "Transfer complete");
                session.notify(
                    &format!("Data written: {} bytes.", bytes_written),
                    Severity::Status,
                );
            }
            Err(TransferError::NotOpen) => {
                warn!("Transfer attempted on a closed session");
                session.notify("Device is not open", Severity::Error);
            }
            Err(e) => {
                warn!(error = %e, "Transfer failed");
                session.notify(&e.to_string(), Severity::Error);
            }
        }
        result
    }

    fn write_packets(&self, handle: &dyn UsbTransport, packets: &[Packet]) -> TransferResult {
        let mut bytes_written = 0usize;
        for (packet_index, packet) in packets.iter().enumerate() {
            match handle.write(packet.as_bytes(), self.packet_timeout) {
                Ok(n) => {
                    if n < packet.len() {
                        warn!(
                            packet_index,
                            expected = packet.len(),
                            written = n,
                            "Short write"
                        );
                    }
                    bytes_written += n;
                }
                Err(source) => {
                    return Err(TransferError::Failed {
                        bytes_written,
                        packet_index,
                        source,
                    });
                }
            }
        }
        Ok(bytes_written)
    }
}

impl Default for TransferExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_PACKET_TIMEOUT_MS))
    }
}
