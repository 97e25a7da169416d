//! Packet framing.
//!
//! Payloads are split into 63-byte fragments, each behind the same control
//! byte. The firmware infers continuation from packet order and cumulative
//! length, so the returned packets must be sent in sequence.

use std::fmt;

use super::constants::{CONFIG_PACKET_SIZE, PACKET_PAYLOAD_SIZE, PACKET_SIZE};
use super::control::{ConfigValue, ControlByte};

/// A single bulk-OUT packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    bytes: [u8; PACKET_SIZE],
    /// Bytes put on the wire (64, or 2 for configuration writes)
    wire_len: usize,
    /// Meaningful payload bytes after the control byte
    payload_len: usize,
}

impl Packet {
    /// Build a zero-padded 64-byte packet. `payload` must fit in 63 bytes.
    fn padded(control: u8, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= PACKET_PAYLOAD_SIZE);
        let mut bytes = [0u8; PACKET_SIZE];
        bytes[0] = control;
        bytes[1..1 + payload.len()].copy_from_slice(payload);
        Self {
            bytes,
            wire_len: PACKET_SIZE,
            payload_len: payload.len(),
        }
    }

    /// Control byte in position 0.
    pub fn control(&self) -> u8 {
        self.bytes[0]
    }

    /// Bytes to hand to the transport.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.wire_len]
    }

    /// Payload without the control byte and without padding.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[1..1 + self.payload_len]
    }

    pub fn len(&self) -> usize {
        self.wire_len
    }

    pub fn is_empty(&self) -> bool {
        self.wire_len == 0
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet(control=0x{:02X}, wire={}, payload={})",
            self.control(),
            self.wire_len,
            self.payload_len
        )
    }
}

/// Frame `payload` into 64-byte packets behind `control`.
///
/// An empty payload yields no packets.
pub fn frame(control: ControlByte, payload: &[u8]) -> Vec<Packet> {
    frame_raw(control.as_byte(), payload)
}

/// Same as [`frame`] for a control byte not covered by [`ControlByte`].
pub fn frame_raw(control: u8, payload: &[u8]) -> Vec<Packet> {
    payload
        .chunks(PACKET_PAYLOAD_SIZE)
        .map(|chunk| Packet::padded(control, chunk))
        .collect()
}

/// Number of packets [`frame`] produces for `len` payload bytes.
pub fn packet_count(len: usize) -> usize {
    len.div_ceil(PACKET_PAYLOAD_SIZE)
}

/// Two-byte configuration write: `[Configuration, value]`, not padded.
pub fn config_packet(value: ConfigValue) -> Packet {
    let mut bytes = [0u8; PACKET_SIZE];
    bytes[0] = ControlByte::Configuration.as_byte();
    bytes[1] = value.as_byte();
    Packet {
        bytes,
        wire_len: CONFIG_PACKET_SIZE,
        payload_len: 1,
    }
}

/// Concatenate the payloads of `packets` in order.
pub fn reassemble(packets: &[Packet]) -> Vec<u8> {
    packets
        .iter()
        .flat_map(|p| p.payload().iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_short_payload_single_packet() {
        for len in [1usize, 2, 17, 62, 63] {
            let payload = pattern(len);
            let packets = frame(ControlByte::LookUpTable, &payload);
            assert_eq!(packets.len(), 1, "len {len}");

            let wire = packets[0].as_bytes();
            assert_eq!(wire.len(), PACKET_SIZE);
            assert_eq!(wire[0], ControlByte::LookUpTable.as_byte());
            assert_eq!(&wire[1..=len], &payload[..]);
            assert!(wire[len + 1..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_fragmentation_count_and_order() {
        for len in [64usize, 126, 127, 192, 1542] {
            let payload = pattern(len);
            let packets = frame(ControlByte::VideoFrame, &payload);

            assert_eq!(packets.len(), len.div_ceil(63), "len {len}");
            assert_eq!(packets.len(), packet_count(len));
            assert!(packets.iter().all(|p| p.control() == 0x00));
            assert!(packets.iter().all(|p| p.len() == PACKET_SIZE));
            assert_eq!(reassemble(&packets), payload);
        }
    }

    #[test]
    fn test_last_fragment_zero_padded() {
        let payload = vec![0xFFu8; 64];
        let packets = frame(ControlByte::VideoFrame, &payload);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].payload(), &[0xFF]);
        assert_eq!(packets[1].as_bytes()[1], 0xFF);
        assert!(packets[1].as_bytes()[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_payload_no_packets() {
        assert!(frame(ControlByte::LookUpTable, &[]).is_empty());
        assert_eq!(packet_count(0), 0);
    }

    #[test]
    fn test_config_packet_is_two_bytes() {
        let packet = config_packet(ConfigValue::TurnLedOn);
        assert_eq!(packet.as_bytes(), &[0x80, 0x0C]);
        assert_eq!(packet.payload(), &[0x0C]);
    }
}
