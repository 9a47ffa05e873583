//! Wire codec for the UDP query protocol.
//!
//! Every request is `FE FD` + command byte + the fixed session magic +
//! command payload. A reply leads with the command byte it answers, followed
//! by a big-endian session id and the payload.

use bytes::{BufMut, BytesMut};

/// Marks a datagram as a query-protocol request.
pub const QUERY_HEADER: [u8; 2] = [0xFE, 0xFD];

/// Session magic echoed by the server in the session id field.
pub const SESSION_MAGIC: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

/// Command byte requesting a challenge token.
pub const CHALLENGE: u8 = 9;

/// Command byte requesting the full statistics block.
pub const STAT: u8 = 0;

/// A decoded query reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub packet_type: u8,
    pub session_id: u32,
    pub payload: Vec<u8>,
}

/// Build the request datagram for `command` with a command-specific payload.
pub fn build_request(command: u8, append: &[u8]) -> Vec<u8> {
    let mut request = BytesMut::with_capacity(QUERY_HEADER.len() + 1 + SESSION_MAGIC.len() + append.len());
    request.put_slice(&QUERY_HEADER);
    request.put_u8(command);
    request.put_slice(&SESSION_MAGIC);
    request.put_slice(append);
    request.to_vec()
}

/// Decode a reply to `command`. Returns `None` for buffers too short to carry
/// a header, and for replies that answer a different command (out-of-order or
/// spoofed datagrams).
pub fn parse_response(command: u8, buffer: &[u8]) -> Option<QueryResponse> {
    if buffer.len() < 5 || buffer[0] != command {
        return None;
    }

    Some(QueryResponse {
        packet_type: buffer[0],
        session_id: u32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]),
        payload: buffer[5..].to_vec(),
    })
}
