//! Byte transports the protocol clients talk through.
//!
//! Both clients drive a [Transport] and nothing else, so the protocol logic
//! can be exercised without sockets. The tokio-backed [UdpTransport] and
//! [TcpTransport] are the implementations used against real servers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs, UdpSocket};
use tokio::time::timeout;

use crate::error::TransportError;

/// Largest payload a query server will answer with (one UDP datagram).
pub const MAX_DATAGRAM: usize = 65535;

/// A connected, bidirectional byte channel with per-call receive deadlines.
#[async_trait]
pub trait Transport: Send {
    /// Write the whole buffer to the peer.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read whatever is currently available, up to `max_len` bytes. For UDP
    /// that is one datagram; for TCP the read may be short.
    async fn receive(&mut self, max_len: usize, wait: Duration)
        -> Result<Vec<u8>, TransportError>;

    /// Read exactly `len` bytes, looping over short reads until the deadline
    /// elapses. A deadline hit mid-collection is a [TransportError::Timeout].
    async fn receive_exact(&mut self, len: usize, wait: Duration)
        -> Result<Vec<u8>, TransportError>;

    /// Tear the channel down. Further calls fail with [TransportError::Closed].
    async fn close(&mut self);
}

/// A connected UDP socket bound to an ephemeral local port.
pub struct UdpTransport {
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(TransportError::Unreachable)?;
        socket
            .connect(addr)
            .await
            .map_err(TransportError::Unreachable)?;

        Ok(UdpTransport {
            socket: Some(socket),
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        socket.send(bytes).await.map_err(TransportError::Send)?;
        Ok(())
    }

    async fn receive(
        &mut self,
        max_len: usize,
        wait: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        let mut buffer = vec![0u8; max_len];

        match timeout(wait, socket.recv(&mut buffer)).await {
            Ok(Ok(read)) => {
                buffer.truncate(read);
                Ok(buffer)
            }
            Ok(Err(e)) => Err(TransportError::Receive(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn receive_exact(
        &mut self,
        len: usize,
        wait: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        // Datagrams arrive whole, so collect until enough of them came in.
        let mut collected = Vec::with_capacity(len);
        while collected.len() < len {
            let chunk = self.receive(MAX_DATAGRAM, wait).await?;
            collected.extend_from_slice(&chunk);
        }
        collected.truncate(len);
        Ok(collected)
    }

    async fn close(&mut self) {
        self.socket = None;
    }
}

/// A TCP stream with connect and receive deadlines.
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub async fn connect(
        addr: impl ToSocketAddrs,
        wait: Duration,
    ) -> Result<Self, TransportError> {
        match timeout(wait, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(TcpTransport {
                stream: Some(stream),
            }),
            Ok(Err(e)) => Err(TransportError::Unreachable(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream
            .write_all(bytes)
            .await
            .map_err(TransportError::Send)?;
        Ok(())
    }

    async fn receive(
        &mut self,
        max_len: usize,
        wait: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut buffer = vec![0u8; max_len];

        match timeout(wait, stream.read(&mut buffer)).await {
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(read)) => {
                buffer.truncate(read);
                Ok(buffer)
            }
            Ok(Err(e)) => Err(TransportError::Receive(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn receive_exact(
        &mut self,
        len: usize,
        wait: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut buffer = vec![0u8; len];

        match timeout(wait, stream.read_exact(&mut buffer)).await {
            Ok(Ok(_)) => Ok(buffer),
            Ok(Err(e)) => Err(TransportError::Receive(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn udp_sends_and_receives_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut transport = UdpTransport::connect(server.local_addr().unwrap())
            .await
            .unwrap();

        transport.send(b"ping").await.unwrap();
        let mut buffer = [0u8; 16];
        let (read, peer) = server.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..read], b"ping");

        server.send_to(b"pong", peer).await.unwrap();
        let reply = transport
            .receive(MAX_DATAGRAM, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"pong");
    }

    #[tokio::test]
    async fn udp_receive_times_out_without_a_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut transport = UdpTransport::connect(server.local_addr().unwrap())
            .await
            .unwrap();

        assert!(matches!(
            transport.receive(MAX_DATAGRAM, Duration::from_millis(20)).await,
            Err(TransportError::Timeout)
        ));
    }

    #[tokio::test]
    async fn closed_udp_transport_refuses_io() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut transport = UdpTransport::connect(server.local_addr().unwrap())
            .await
            .unwrap();
        transport.close().await;

        assert!(matches!(
            transport.send(b"x").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn tcp_receive_exact_collects_split_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"ab").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            stream.write_all(b"cd").await.unwrap();
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(1))
            .await
            .unwrap();
        let bytes = transport
            .receive_exact(4, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bytes, b"abcd");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_receive_exact_times_out_on_a_short_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"ab").await.unwrap();
            // Hold the socket open past the caller's deadline.
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(
            transport.receive_exact(4, Duration::from_millis(30)).await,
            Err(TransportError::Timeout)
        ));
        server.await.unwrap();
    }
}
