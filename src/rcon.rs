//! RCON client for remote command execution.

use std::time::Duration;

use bytes::Buf;
use log::{debug, trace, warn};

use crate::error::{RconError, TransportError};
use crate::packet::{self, RconPacket};
use crate::transport::{TcpTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Connected,
    Authorized,
}

/// Synchronous request/response RCON session: authorize once, then issue
/// commands. The client must be `mut` as it keeps the running request id
/// counter used to correlate replies.
///
/// One request is in flight at a time; a reply that does not match the
/// outstanding request is dropped rather than surfaced.
///
/// ## Example
/// ```no_run
/// use pocketquery::rcon::RconClient;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let mut client = RconClient::connect("203.0.113.7", 19132, Duration::from_secs(3)).await;
///     if client.authorize("<put rcon password here>").await.is_ok() {
///         let reply = client.send_command("list").await;
///         println!("{reply:?}");
///     }
/// }
/// ```
pub struct RconClient<T: Transport = TcpTransport> {
    transport: Option<T>,
    state: SessionState,
    next_request_id: i32,
    last_response: Option<String>,
    last_error: Option<TransportError>,
    timeout: Duration,
}

impl RconClient<TcpTransport> {
    /// Open a TCP connection to the server. A connection failure does not
    /// error: the client comes back disconnected with the failure recorded
    /// under [last_error](Self::last_error).
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Self {
        match TcpTransport::connect((host, port), timeout).await {
            Ok(transport) => {
                trace!("opened tcp stream to {host}:{port}");
                RconClient::with_transport(transport, timeout)
            }
            Err(err) => {
                warn!("rcon connection to {host}:{port} failed: {err}");
                RconClient {
                    transport: None,
                    state: SessionState::Disconnected,
                    next_request_id: 0,
                    last_response: None,
                    last_error: Some(err),
                    timeout,
                }
            }
        }
    }
}

impl<T: Transport> RconClient<T> {
    /// Wrap an already-connected transport.
    pub fn with_transport(transport: T, timeout: Duration) -> Self {
        RconClient {
            transport: Some(transport),
            state: SessionState::Connected,
            next_request_id: 0,
            last_response: None,
            last_error: None,
            timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn is_authorized(&self) -> bool {
        self.state == SessionState::Authorized
    }

    /// The body of the last accepted command reply.
    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// The transport failure recorded by a silent [connect](Self::connect).
    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    /// Close the transport and drop back to the disconnected state.
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.state = SessionState::Disconnected;
    }

    /// Log in with the server's RCON password. Success requires a reply
    /// carrying the request id just sent and the login acknowledgement type;
    /// anything else tears the session down and reports [RconError::Auth].
    /// There is no retry short of reconnecting.
    pub async fn authorize(&mut self, password: &str) -> Result<(), RconError> {
        if !self.is_connected() {
            return Err(RconError::Auth);
        }

        let request_id = self.next_request_id();
        let login = RconPacket::new(request_id, packet::PACKET_LOGIN, password.as_bytes());
        trace!("sending login packet with request id {request_id}");
        if let Err(err) = self.write_packet(&login).await {
            self.disconnect().await;
            return Err(err);
        }

        match self.read_packet().await {
            Ok(Some(reply)) => match reply.correlate(request_id, packet::RESPONSE_LOGIN) {
                Ok(()) => {
                    trace!("authorized");
                    self.state = SessionState::Authorized;
                    Ok(())
                }
                Err(err) => {
                    // A failed login shows up as a mismatch too: some servers
                    // answer it with request id -1.
                    debug!("login reply rejected: {err}");
                    self.disconnect().await;
                    Err(RconError::Auth)
                }
            },
            Ok(None) => {
                debug!("no reply to login packet");
                self.disconnect().await;
                Err(RconError::Auth)
            }
            Err(err) => {
                self.disconnect().await;
                Err(err)
            }
        }
    }

    /// Run a console command. Returns `None` without touching the wire unless
    /// the session is authorized, and `None` for a missing or uncorrelated
    /// reply; the caller treats both like a timeout and may retry.
    pub async fn send_command(&mut self, command: &str) -> Result<Option<String>, RconError> {
        if !self.is_authorized() {
            return Ok(None);
        }

        let request_id = self.next_request_id();
        let request = RconPacket::new(request_id, packet::PACKET_COMMAND, command.as_bytes());
        trace!("sending command packet with request id {request_id}");
        self.write_packet(&request).await?;

        match self.read_packet().await? {
            Some(reply) => match reply.correlate(request_id, packet::RESPONSE_COMMAND) {
                Ok(()) => {
                    let body = String::from_utf8_lossy(reply.body()).into_owned();
                    self.last_response = Some(body.clone());
                    Ok(Some(body))
                }
                Err(err) => {
                    debug!("dropping reply to '{command}': {err}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn next_request_id(&mut self) -> i32 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    async fn write_packet(&mut self, packet: &RconPacket) -> Result<(), RconError> {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        transport.send(&packet.pack()).await?;
        Ok(())
    }

    /// Read one framed packet: exactly four size bytes, then exactly that
    /// many more. A server that never starts answering yields `Ok(None)`; a
    /// frame cut off mid-read is a hard transport failure.
    async fn read_packet(&mut self) -> Result<Option<RconPacket>, RconError> {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;

        let size_bytes = match transport.receive_exact(4, self.timeout).await {
            Ok(bytes) => bytes,
            Err(TransportError::Timeout) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut size_bytes = &size_bytes[..];
        let size = size_bytes.get_u32_le() as usize;

        let frame = transport.receive_exact(size, self.timeout).await?;
        RconPacket::unpack(&frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn client_with(script: impl FnOnce(&mut ScriptedTransport)) -> RconClient<ScriptedTransport> {
        let mut transport = ScriptedTransport::new();
        script(&mut transport);
        RconClient::with_transport(transport, TIMEOUT)
    }

    fn reply(request_id: i32, packet_type: i32, body: &[u8]) -> Vec<u8> {
        RconPacket::new(request_id, packet_type, body).pack()
    }

    #[tokio::test]
    async fn authorize_accepts_a_correlated_login_ack() {
        let mut client = client_with(|t| {
            t.push_stream(&reply(1, packet::RESPONSE_LOGIN, b""));
        });

        assert!(client.authorize("hunter2").await.is_ok());
        assert!(client.is_authorized());

        let sent = &client.transport.as_ref().unwrap().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(
            RconPacket::unpack(&sent[0][4..]).unwrap(),
            RconPacket::new(1, packet::PACKET_LOGIN, &b"hunter2"[..])
        );
    }

    #[tokio::test]
    async fn authorize_with_mismatched_request_id_disconnects() {
        let mut client = client_with(|t| {
            t.push_stream(&reply(99, packet::RESPONSE_LOGIN, b""));
        });

        assert!(matches!(
            client.authorize("hunter2").await,
            Err(RconError::Auth)
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn authorize_with_wrong_reply_type_disconnects() {
        let mut client = client_with(|t| {
            t.push_stream(&reply(1, packet::RESPONSE_COMMAND, b""));
        });

        assert!(matches!(
            client.authorize("hunter2").await,
            Err(RconError::Auth)
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn authorize_without_a_reply_disconnects() {
        let mut client = client_with(|_| {});

        assert!(matches!(
            client.authorize("hunter2").await,
            Err(RconError::Auth)
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn send_command_requires_authorization() {
        let mut client = client_with(|_| {});

        assert!(client.send_command("list").await.unwrap().is_none());
        assert!(client.transport.as_ref().unwrap().sent.is_empty());
    }

    #[tokio::test]
    async fn send_command_while_disconnected_returns_nothing() {
        let mut client = client_with(|_| {});
        client.disconnect().await;

        assert!(client.send_command("list").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_command_returns_the_correlated_body() {
        let mut client = client_with(|t| {
            t.push_stream(&reply(1, packet::RESPONSE_LOGIN, b""));
            t.push_stream(&reply(2, packet::RESPONSE_COMMAND, b"There are 2/10 players"));
        });

        client.authorize("hunter2").await.unwrap();
        let response = client.send_command("list").await.unwrap();

        assert_eq!(response.as_deref(), Some("There are 2/10 players"));
        assert_eq!(client.last_response(), Some("There are 2/10 players"));
    }

    #[tokio::test]
    async fn send_command_drops_uncorrelated_replies() {
        let mut client = client_with(|t| {
            t.push_stream(&reply(1, packet::RESPONSE_LOGIN, b""));
            t.push_stream(&reply(77, packet::RESPONSE_COMMAND, b"stale"));
        });

        client.authorize("hunter2").await.unwrap();
        let response = client.send_command("list").await.unwrap();

        assert!(response.is_none());
        // An uncorrelated reply is not an auth failure, the session stays up.
        assert!(client.is_authorized());
    }

    #[tokio::test]
    async fn request_ids_increment_across_requests() {
        let mut client = client_with(|t| {
            t.push_stream(&reply(1, packet::RESPONSE_LOGIN, b""));
            t.push_stream(&reply(2, packet::RESPONSE_COMMAND, b"a"));
            t.push_stream(&reply(3, packet::RESPONSE_COMMAND, b"b"));
        });

        client.authorize("hunter2").await.unwrap();
        client.send_command("say a").await.unwrap();
        client.send_command("say b").await.unwrap();

        let ids: Vec<i32> = client
            .transport
            .as_ref()
            .unwrap()
            .sent
            .iter()
            .map(|frame| RconPacket::unpack(&frame[4..]).unwrap().request_id())
            .collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[tokio::test]
    async fn truncated_frame_is_a_hard_failure() {
        let mut client = client_with(|t| {
            t.push_stream(&reply(1, packet::RESPONSE_LOGIN, b""));
            // Size announces 14 bytes but the server sends nothing after it.
            t.push_stream(&14u32.to_le_bytes());
        });

        client.authorize("hunter2").await.unwrap();
        assert!(matches!(
            client.send_command("list").await,
            Err(RconError::Transport(TransportError::Timeout))
        ));
    }
}
