//! High-level "send config / send frame" entry points for external callers.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::payload::{LookupTable, VideoFrame};
use crate::protocol::{ConfigValue, ControlByte, config_packet, frame, frame_raw};
use crate::session::DeviceSession;
use crate::transfer::{TransferExecutor, TransferResult};

/// Frames payloads and hands them to the transfer executor.
pub struct Controller {
    session: Arc<DeviceSession>,
    executor: TransferExecutor,
}

impl Controller {
    pub fn new(session: Arc<DeviceSession>, executor: TransferExecutor) -> Self {
        Self { session, executor }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn executor(&self) -> &TransferExecutor {
        &self.executor
    }

    /// Two-byte configuration write.
    #[instrument(skip(self))]
    pub fn send_config(&self, value: ConfigValue) -> TransferResult {
        info!(value = %value, "Sending configuration");
        self.executor.write(&self.session, &[config_packet(value)])
    }

    pub fn led_on(&self) -> TransferResult {
        self.send_config(ConfigValue::TurnLedOn)
    }

    pub fn led_off(&self) -> TransferResult {
        self.send_config(ConfigValue::TurnLedOff)
    }

    #[instrument(skip(self, lut))]
    pub fn send_lut(&self, lut: &LookupTable) -> TransferResult {
        let packets = frame(ControlByte::LookUpTable, &lut.to_bytes());
        self.executor.write(&self.session, &packets)
    }

    #[instrument(skip(self, video))]
    pub fn send_video(&self, video: &VideoFrame) -> TransferResult {
        let packets = frame(ControlByte::VideoFrame, video.as_bytes());
        self.executor.write(&self.session, &packets)
    }

    /// Frame an arbitrary payload behind `control`.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn send_raw(&self, control: u8, payload: &[u8]) -> TransferResult {
        let packets = frame_raw(control, payload);
        self.executor.write(&self.session, &packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;
    use crate::events::{CandyEvent, RecordingObserver};
    use crate::payload::Rgb;
    use crate::protocol::reassemble;
    use crate::protocol::constants::{LUT_SIZE, PACKET_SIZE};
    use crate::session::OpenContext;
    use crate::transport::{DeviceBackend, MockBackend};

    fn device() -> DeviceDescriptor {
        DeviceDescriptor::new(0x1D50, 0x607A, "Fadecandy", "USB#VID_1D50&PID_607A&MI_00#6&A")
    }

    fn controller() -> (Arc<MockBackend>, Controller) {
        let backend = Arc::new(MockBackend::new());
        backend.attach(device());
        let session = Arc::new(DeviceSession::new(backend.clone()));
        session.open(&device(), OpenContext::unattended()).unwrap();
        (backend, Controller::new(session, TransferExecutor::default()))
    }

    #[test]
    fn test_led_on_off() {
        let (backend, controller) = controller();
        assert_eq!(controller.led_on().unwrap(), 2);
        assert_eq!(controller.led_off().unwrap(), 2);
        assert_eq!(backend.writes(), vec![vec![0x80, 0x0C], vec![0x80, 0x04]]);
    }

    #[test]
    fn test_send_lut() {
        let (backend, controller) = controller();
        let written = controller.send_lut(&LookupTable::linear()).unwrap();

        let packets = LUT_SIZE.div_ceil(63);
        assert_eq!(written, packets * PACKET_SIZE);
        let writes = backend.writes();
        assert!(writes.iter().all(|w| w[0] == 0x40));
    }

    #[test]
    fn test_send_video_reassembles() {
        let (backend, controller) = controller();
        let mut video = VideoFrame::blank();
        video.set_pixel(7, 7, Rgb::new(1, 2, 3)).unwrap();

        controller.send_video(&video).unwrap();

        let packets: Vec<_> = backend
            .writes()
            .iter()
            .map(|w| {
                assert_eq!(w.len(), PACKET_SIZE);
                assert_eq!(w[0], 0x00);
                w[1..].to_vec()
            })
            .collect();
        let bytes: Vec<u8> = packets.concat();
        assert_eq!(&bytes[..video.as_bytes().len()], video.as_bytes());
        // Consistent with the framer's own reassembly
        let framed = frame(ControlByte::VideoFrame, video.as_bytes());
        assert_eq!(reassemble(&framed), video.as_bytes());
    }

    #[test]
    fn test_empty_raw_payload_writes_nothing() {
        let (backend, controller) = controller();
        assert_eq!(controller.send_raw(0x40, &[]).unwrap(), 0);
        assert!(backend.writes().is_empty());
    }

    /// Discover, open, switch the LED on, close.
    #[test]
    fn test_end_to_end_led_on() {
        let backend = Arc::new(MockBackend::new());
        backend.attach(DeviceDescriptor::new(
            0x1D50,
            0x607A,
            "Fadecandy",
            r"\\?\USB#VID_1D50&PID_607A&MI_00#6&1b2c3d&0&0000",
        ));

        let mut watcher = crate::discovery::DeviceWatcher::new(
            backend.clone() as Arc<dyn DeviceBackend>,
            crate::device::DeviceFilter::default(),
        );
        let added = match watcher.poll().as_slice() {
            [CandyEvent::DeviceAdded(descriptor)] => descriptor.clone(),
            other => panic!("unexpected discovery events: {other:?}"),
        };

        let session = Arc::new(DeviceSession::new(backend.clone()));
        let recorder = Arc::new(RecordingObserver::new());
        session.subscribe(recorder.clone());
        session.open(&added, OpenContext::unattended()).unwrap();

        let controller = Controller::new(Arc::clone(&session), TransferExecutor::default());
        assert_eq!(controller.led_on().unwrap(), 2);

        session.close();
        let closing: Vec<_> = recorder
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, CandyEvent::Closing(_)))
            .collect();
        assert_eq!(closing, vec![CandyEvent::Closing(added)]);
    }
}
