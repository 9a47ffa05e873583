//! Pure Rust async client for the [Minecraft query protocol](https://wiki.vg/Query) and the
//! Bedrock flavor of RCON: status over UDP, remote administration over TCP.
//!
//! The two clients are independent. [query::QueryClient] runs the challenge
//! handshake, the full-stat request and the legacy unconnected ping;
//! [rcon::RconClient] authenticates once and then executes commands. Both
//! speak through the [transport::Transport] trait, so the wire logic is
//! testable without sockets.
pub mod codec;
pub mod error;
pub mod packet;
pub mod query;
pub mod rcon;
pub mod resolver;
pub mod transport;

pub use error::{QueryError, RconError, TransportError};
pub use query::{PingResult, QueryClient, ServerInfo, StatResult};
pub use rcon::RconClient;
