//! UDP query client: challenge handshake, full statistics and legacy ping.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use log::{debug, trace};

use crate::codec;
use crate::error::{QueryError, TransportError};
use crate::resolver;
use crate::transport::{Transport, UdpTransport, MAX_DATAGRAM};

/// Bytes preceding the key-value block: the splitnum marker and two ints.
const STAT_PREAMBLE_LEN: usize = 11;

/// Separates the key-value block from the player list.
const PLAYER_SENTINEL: &[u8] = b"\x00\x00\x01player_\x00\x00";

/// Unconnected ping packet id.
const PING_PACKET_ID: u8 = 0x01;

/// Offline-message magic carried by ping and pong.
const PING_MAGIC: [u8; 16] = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

/// Pong header: packet id, echoed time, server guid, magic, string length.
const PONG_HEADER_LEN: usize = 1 + 8 + 8 + 16 + 2;

/// Server metadata and player list from a full-stat exchange.
///
/// Keys arrive as free-form strings, so they are kept in wire order next to
/// accessors for the well-known ones. An absent key means the server did not
/// report it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatResult {
    fields: Vec<(String, String)>,
    /// Names of the players online, possibly empty.
    pub players: Vec<String>,
    /// Server software name, `"Vanilla"` when the server reports no plugins.
    pub software: String,
    /// Plugin names, when the plugin string carried a list.
    pub plugins: Option<Vec<String>>,
    /// The two verbatim halves of the raw plugin string.
    pub raw_plugins: Option<(String, Option<String>)>,
}

impl StatResult {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// All reported fields, in wire order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn hostname(&self) -> Option<&str> {
        self.get("hostname")
    }

    pub fn gametype(&self) -> Option<&str> {
        self.get("gametype")
    }

    pub fn map(&self) -> Option<&str> {
        self.get("map")
    }

    pub fn numplayers(&self) -> Option<&str> {
        self.get("numplayers")
    }

    pub fn maxplayers(&self) -> Option<&str> {
        self.get("maxplayers")
    }

    pub fn hostip(&self) -> Option<&str> {
        self.get("hostip")
    }

    pub fn hostport(&self) -> Option<&str> {
        self.get("hostport")
    }

    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }
}

/// Summary fields of an unconnected pong, in wire order. Servers running
/// older software answer with fewer fields, leaving the tail unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingResult {
    pub game_id: Option<String>,
    pub hostname: Option<String>,
    pub protocol: Option<String>,
    pub version: Option<String>,
    pub numplayers: Option<String>,
    pub maxplayers: Option<String>,
    pub server_id: Option<String>,
    pub software: Option<String>,
    pub gametype: Option<String>,
}

/// Both halves of a status probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub query: StatResult,
    pub ping: Option<PingResult>,
}

/// Query protocol client. One challenge/full-stat handshake per call; the
/// legacy ping is independent of the handshake.
///
/// ## Example
/// ```no_run
/// use pocketquery::query::QueryClient;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), pocketquery::QueryError> {
///     let mut client = QueryClient::connect("play.example.org", 19132, Duration::from_secs(1)).await?;
///     let stat = client.full_stat().await?;
///
///     println!("{:?} has {} players", stat.hostname(), stat.players.len());
///     Ok(())
/// }
/// ```
pub struct QueryClient<T: Transport = UdpTransport> {
    transport: T,
    timeout: Duration,
}

impl QueryClient<UdpTransport> {
    /// Connect a UDP socket to the server, rewriting `host` through its SRV
    /// record first unless it is a literal IP address.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, QueryError> {
        let host = resolver::resolve_srv(host).await;
        let transport = UdpTransport::connect((host.as_str(), port))
            .await
            .map_err(QueryError::Transport)?;
        Ok(QueryClient::new(transport, timeout))
    }
}

impl<T: Transport> QueryClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        QueryClient { transport, timeout }
    }

    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    /// Run the full exchange: challenge, full stat, then a ping. The ping
    /// half is optional by nature, the query half is not.
    pub async fn info(&mut self) -> Result<ServerInfo, QueryError> {
        let query = self.full_stat().await?;
        let ping = self.ping().await?;
        Ok(ServerInfo { query, ping })
    }

    /// Challenge the server and request the full statistics block.
    pub async fn full_stat(&mut self) -> Result<StatResult, QueryError> {
        let token = self.request_challenge().await?;
        self.request_full_stat(token).await
    }

    /// Ask for a challenge token to echo back in the full-stat request.
    pub async fn request_challenge(&mut self) -> Result<i32, QueryError> {
        trace!("requesting challenge token");
        let reply = match self.exchange(codec::CHALLENGE, &[]).await? {
            Some(reply) => reply,
            None => return Err(QueryError::Challenge),
        };

        parse_challenge_token(&reply.payload).ok_or(QueryError::Challenge)
    }

    /// Request the full statistics block, echoing the challenge token.
    pub async fn request_full_stat(&mut self, token: i32) -> Result<StatResult, QueryError> {
        let mut append = BytesMut::with_capacity(8);
        append.put_i32(token);
        append.put_slice(&[0, 0, 0, 0]);

        trace!("requesting full stat with token {token}");
        let reply = match self.exchange(codec::STAT, &append).await? {
            Some(reply) => reply,
            None => return Err(QueryError::Stat),
        };

        parse_full_stat(&reply.payload)
    }

    /// Send an unconnected ping and parse the pong, if any came back. The
    /// client id is regenerated per call: some servers silently drop pings
    /// from an all-zero client.
    pub async fn ping(&mut self) -> Result<Option<PingResult>, QueryError> {
        let mut ping = BytesMut::with_capacity(33);
        ping.put_u8(PING_PACKET_ID);
        ping.put_u64(0); // send time
        ping.put_slice(&PING_MAGIC);
        ping.put_u64(rand::random()); // client guid

        trace!("sending unconnected ping");
        self.transport.send(&ping).await.map_err(QueryError::Transport)?;

        let pong = match self.transport.receive(MAX_DATAGRAM, self.timeout).await {
            Ok(pong) => pong,
            Err(TransportError::Timeout) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if pong.len() < PONG_HEADER_LEN {
            debug!("pong shorter than its header, ignoring");
            return Ok(None);
        }

        Ok(Some(parse_pong_fields(&pong[PONG_HEADER_LEN..])))
    }

    /// One request/response round: a missing or mis-addressed reply is
    /// `None`, hard transport failures propagate.
    async fn exchange(
        &mut self,
        command: u8,
        append: &[u8],
    ) -> Result<Option<codec::QueryResponse>, QueryError> {
        let request = codec::build_request(command, append);
        self.transport
            .send(&request)
            .await
            .map_err(QueryError::Transport)?;

        let buffer = match self.transport.receive(MAX_DATAGRAM, self.timeout).await {
            Ok(buffer) => buffer,
            Err(TransportError::Timeout) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(codec::parse_response(command, &buffer))
    }
}

/// The challenge payload is a NUL-terminated ASCII decimal.
fn parse_challenge_token(payload: &[u8]) -> Option<i32> {
    let digits = payload.split(|byte| *byte == 0).next()?;
    std::str::from_utf8(digits).ok()?.trim().parse().ok()
}

/// Parse a full-stat payload into fields, players and plugin breakdown.
pub fn parse_full_stat(payload: &[u8]) -> Result<StatResult, QueryError> {
    if payload.len() < STAT_PREAMBLE_LEN {
        return Err(QueryError::Malformed("payload shorter than the stat preamble"));
    }
    let data = &payload[STAT_PREAMBLE_LEN..];

    let split = find_subsequence(data, PLAYER_SENTINEL)
        .ok_or(QueryError::Malformed("player section marker missing"))?;
    let key_value_block = &data[..split];
    let player_block = &data[split + PLAYER_SENTINEL.len()..];
    if find_subsequence(player_block, PLAYER_SENTINEL).is_some() {
        return Err(QueryError::Malformed("player section marker repeated"));
    }

    let mut result = StatResult {
        fields: parse_key_values(key_value_block),
        players: parse_players(player_block),
        ..StatResult::default()
    };

    // The plugin field doubles as the software name: "Software: PluginA 1.0;
    // PluginB 2.0". Empty means unmodified server software.
    let raw = result.get("plugins").unwrap_or("").to_string();
    if !raw.is_empty() {
        let (software, tail) = match raw.split_once(": ") {
            Some((software, tail)) => (software.to_string(), Some(tail.to_string())),
            None => (raw, None),
        };
        result.plugins = tail
            .as_deref()
            .map(|tail| tail.split("; ").map(str::to_string).collect());
        result.raw_plugins = Some((software.clone(), tail));
        result.software = software;
    } else {
        result.software = "Vanilla".to_string();
    }

    Ok(result)
}

/// Key-value block: NUL-separated elements walked in pairs. A dangling
/// element with no value is dropped.
fn parse_key_values(block: &[u8]) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut parts = block.split(|byte| *byte == 0);
    while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
        fields.push((
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
    }
    fields
}

/// Player block: NUL-separated names closed by a doubled terminator. A lone
/// NUL is an empty list.
fn parse_players(block: &[u8]) -> Vec<String> {
    if block == [0x00] {
        return Vec::new();
    }

    let trimmed = &block[..block.len().saturating_sub(2)];
    trimmed
        .split(|byte| *byte == 0)
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

/// Pong fields are semicolon-delimited and positional; short pongs leave the
/// tail unset.
fn parse_pong_fields(data: &[u8]) -> PingResult {
    let text = String::from_utf8_lossy(data);
    let mut parts = text.split(';');
    let mut next = || parts.next().map(str::to_string);

    PingResult {
        game_id: next(),
        hostname: next(),
        protocol: next(),
        version: next(),
        numplayers: next(),
        maxplayers: next(),
        server_id: next(),
        software: next(),
        gametype: next(),
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
