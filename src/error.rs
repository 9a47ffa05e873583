use std::io;

use thiserror::Error;

/// Failures of the underlying byte transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Returned if the host is down, refuses the connection or is behind a
    /// firewall.
    #[error("host cannot be reached")]
    Unreachable(#[source] io::Error),
    /// Internal error used if the transport was successfully established, but
    /// there was a problem writing to the socket.
    #[error("cannot send request to host")]
    Send(#[source] io::Error),
    /// Internal error used if the transport was successfully established, but
    /// there was a problem reading from the socket.
    #[error("cannot receive response from host")]
    Receive(#[source] io::Error),
    /// Returned if the server did not respond in time.
    #[error("timed out waiting for the server")]
    Timeout,
    /// Returned if the transport was closed, either locally or by the peer.
    #[error("transport is closed")]
    Closed,
}

/// Possible errors for the UDP query exchange.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Returned if no valid reply to the challenge request arrived.
    #[error("no valid challenge reply")]
    Challenge,
    /// Returned if no reply to the full-stat request arrived.
    #[error("no full-stat reply")]
    Stat,
    /// Returned if a full-stat payload does not follow the expected grammar.
    #[error("malformed full-stat payload: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Possible errors for the RCON channel.
#[derive(Error, Debug)]
pub enum RconError {
    /// Returned if a frame is too short to carry a request id, a type and the
    /// trailing NUL pair, or lacks the NUL pair entirely.
    #[error("rcon packet malformed")]
    MalformedPacket,
    /// Returned if the server rejected the login, or answered it with a
    /// mismatched reply.
    #[error("the server rejected the authentication attempt")]
    Auth,
    /// Returned if a reply does not carry the request id and type of the
    /// outstanding request.
    #[error("reply does not match the outstanding request")]
    Correlation,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
