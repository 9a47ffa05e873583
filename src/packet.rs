//! RCON packet framing.
//!
//! Both directions share one frame layout: a little-endian `u32` byte count
//! of everything that follows, then request id and type as little-endian
//! `i32`, the body, and a trailing NUL pair.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::RconError;

/// Request type for executing a console command.
pub const PACKET_COMMAND: i32 = 2;
/// Request type for logging in.
pub const PACKET_LOGIN: i32 = 3;
/// Request type for attaching to the server log feed.
pub const PACKET_LOGGER: i32 = 4;
/// Request type for probing the protocol revision.
pub const PACKET_PROTOCOL_CHECK: i32 = 9;

/// Reply type acknowledging a command.
pub const RESPONSE_COMMAND: i32 = 0;
/// Reply type acknowledging a login.
pub const RESPONSE_LOGIN: i32 = 2;

/// One packet on the RCON channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    request_id: i32,
    packet_type: i32,
    body: Vec<u8>,
}

impl RconPacket {
    /// Frame bytes besides the body: request id, type and the NUL pair.
    pub const BASE_PACKET_SIZE: usize = 10;

    pub fn new(request_id: i32, packet_type: i32, body: impl Into<Vec<u8>>) -> Self {
        RconPacket {
            request_id,
            packet_type,
            body: body.into(),
        }
    }

    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    pub fn packet_type(&self) -> i32 {
        self.packet_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The value of the leading size field: everything after it, in bytes.
    pub fn size(&self) -> u32 {
        (self.body.len() + Self::BASE_PACKET_SIZE) as u32
    }

    /// Encode the packet, size field included.
    pub fn pack(&self) -> Vec<u8> {
        let mut frame = BytesMut::with_capacity(4 + self.body.len() + Self::BASE_PACKET_SIZE);
        frame.put_u32_le(self.size());
        frame.put_i32_le(self.request_id);
        frame.put_i32_le(self.packet_type);
        frame.put_slice(&self.body);
        frame.put_slice(&[0, 0]);
        frame.to_vec()
    }

    /// Decode a frame, minus the size field the caller already consumed to
    /// know how much to read.
    pub fn unpack(frame: &[u8]) -> Result<Self, RconError> {
        if frame.len() < Self::BASE_PACKET_SIZE || frame[frame.len() - 2..] != [0, 0] {
            return Err(RconError::MalformedPacket);
        }

        let mut header = frame;
        let request_id = header.get_i32_le();
        let packet_type = header.get_i32_le();
        let body = frame[8..frame.len() - 2].to_vec();

        Ok(RconPacket {
            request_id,
            packet_type,
            body,
        })
    }

    /// Check that this packet answers the request just sent.
    pub fn correlate(&self, request_id: i32, packet_type: i32) -> Result<(), RconError> {
        if self.request_id != request_id || self.packet_type != packet_type {
            return Err(RconError::Correlation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_layout_is_size_id_type_body_nuls() {
        let packet = RconPacket::new(7, PACKET_COMMAND, &b"list"[..]);
        assert_eq!(
            packet.pack(),
            [
                14, 0, 0, 0, // size: 4 + 4 + 4 + 2
                7, 0, 0, 0, // request id
                2, 0, 0, 0, // type
                b'l', b'i', b's', b't', // body
                0, 0, // terminator pair
            ]
        );
    }

    #[test]
    fn packets_round_trip() {
        for request_id in [i32::MIN, -1, 0, 1, 7, 42, i32::MAX] {
            let packet = RconPacket::new(request_id, PACKET_LOGIN, &b"hunter2"[..]);
            let frame = packet.pack();
            assert_eq!(RconPacket::unpack(&frame[4..]).unwrap(), packet);
        }
    }

    #[test]
    fn empty_body_round_trips() {
        let packet = RconPacket::new(1, PACKET_PROTOCOL_CHECK, Vec::new());
        assert_eq!(packet.size(), 10);
        assert_eq!(RconPacket::unpack(&packet.pack()[4..]).unwrap(), packet);
    }

    #[test]
    fn arbitrary_body_bytes_round_trip() {
        let packet = RconPacket::new(9, PACKET_COMMAND, vec![0xFF, 0x00, 0x7F, 0x80]);
        let frame = packet.pack();
        assert_eq!(RconPacket::unpack(&frame[4..]).unwrap(), packet);
    }

    #[test]
    fn short_frame_is_malformed() {
        assert!(matches!(
            RconPacket::unpack(&[0; 9]),
            Err(RconError::MalformedPacket)
        ));
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let mut frame = RconPacket::new(1, PACKET_COMMAND, &b"say hi"[..]).pack();
        let last = frame.len() - 1;
        frame[last] = b'!';
        assert!(matches!(
            RconPacket::unpack(&frame[4..]),
            Err(RconError::MalformedPacket)
        ));
    }

    #[test]
    fn correlate_requires_both_id_and_type() {
        let packet = RconPacket::new(3, RESPONSE_COMMAND, Vec::new());
        assert!(packet.correlate(3, RESPONSE_COMMAND).is_ok());
        assert!(matches!(
            packet.correlate(4, RESPONSE_COMMAND),
            Err(RconError::Correlation)
        ));
        assert!(matches!(
            packet.correlate(3, RESPONSE_LOGIN),
            Err(RconError::Correlation)
        ));
    }
}
