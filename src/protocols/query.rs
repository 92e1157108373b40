//! GameSpy4 query over UDP.
//!
//! First a handshake gets a challenge token for our session ID, then a full
//! stat request carrying that token gets back the server's key/value block and
//! player list.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace};

use crate::{
    PingError, net,
    options::{Options, TokenEncoding},
};

pub const MAGIC: [u8; 2] = [0xFE, 0xFD];
pub const HANDSHAKE_TYPE: u8 = 0x09;
pub const STAT_TYPE: u8 = 0x00;

/// Type byte plus the echoed session ID.
const HEADER_LEN: usize = 5;
/// Servers only keep the low four bits of each session ID byte.
const SESSION_ID_MASK: u32 = 0x0F0F_0F0F;
/// Asking for the full stat instead of the basic one is done by padding the
/// request.
const FULL_STAT_PADDING: [u8; 4] = [0x00; 4];

const SPLITNUM_PADDING: &[u8] = b"splitnum\x00\x80\x00";
const PLAYER_SECTION: &[u8] = b"\x01player_\x00\x00";

pub fn generate_session_id() -> u32 {
    rand::random::<u32>() & SESSION_ID_MASK
}

pub fn handshake_packet(session_id: u32) -> [u8; 7] {
    let id = session_id.to_be_bytes();
    [MAGIC[0], MAGIC[1], HANDSHAKE_TYPE, id[0], id[1], id[2], id[3]]
}

pub fn full_stat_packet(session_id: u32, token: i64, encoding: TokenEncoding) -> Vec<u8> {
    let mut packet = Vec::with_capacity(24);
    packet.extend_from_slice(&MAGIC);
    packet.push(STAT_TYPE);
    packet.extend_from_slice(&session_id.to_be_bytes());
    match encoding {
        TokenEncoding::Ascii => packet.extend_from_slice(token.to_string().as_bytes()),
        TokenEncoding::BigEndian => packet.extend_from_slice(&(token as u32).to_be_bytes()),
    }
    packet.extend_from_slice(&FULL_STAT_PADDING);
    packet
}

/// The response to a full stat request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullStat {
    pub values: HashMap<String, String>,
    pub players: Vec<String>,
}

impl FullStat {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn motd(&self) -> Option<&str> {
        self.get("hostname")
    }

    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }

    pub fn online_players(&self) -> Option<u32> {
        self.get("numplayers")?.parse().ok()
    }

    pub fn max_players(&self) -> Option<u32> {
        self.get("maxplayers")?.parse().ok()
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parses a full stat datagram, header included.
///
/// Pairs NUL-separated strings as key and value until it hits an empty key.
/// If the datagram has the usual player section after that, the names in it
/// end up in [`FullStat::players`].
pub fn parse_stat_block(datagram: &[u8]) -> FullStat {
    let mut body = datagram.get(HEADER_LEN..).unwrap_or_default();
    if let Some(rest) = body.strip_prefix(SPLITNUM_PADDING) {
        body = rest;
    }

    let mut values = HashMap::new();
    let mut fields = body.split(|&b| b == 0);
    while let Some(key) = fields.next() {
        if key.is_empty() {
            break;
        }
        let value = fields.next().unwrap_or_default();
        values.insert(lossy(key), lossy(value));
    }

    let players = body
        .windows(PLAYER_SECTION.len())
        .position(|window| window == PLAYER_SECTION)
        .map(|start| {
            body[start + PLAYER_SECTION.len()..]
                .split(|&b| b == 0)
                .take_while(|name| !name.is_empty())
                .map(lossy)
                .collect()
        })
        .unwrap_or_default();

    FullStat { values, players }
}

/// The ASCII decimal token after the header, up to its terminating NUL.
fn parse_token(datagram: &[u8]) -> Result<i64, PingError> {
    let raw = datagram.get(HEADER_LEN..).unwrap_or_default();
    let raw = raw.split(|&b| b == 0).next().unwrap_or_default();
    let text = std::str::from_utf8(raw)
        .map_err(|_| PingError::malformed("challenge token is not ascii"))?;
    let token = text
        .trim()
        .parse::<i64>()
        .map_err(|_| PingError::malformed(format!("challenge token {text:?} is not a number")))?;
    if token < i32::MIN as i64 || token > u32::MAX as i64 {
        return Err(PingError::malformed(format!(
            "challenge token {token} does not fit in 32 bits"
        )));
    }
    Ok(token)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    HandshakeSent { session_id: u32 },
    /// Got a token and sent the full stat request with it.
    StatsRequested { session_id: u32, token: i64 },
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStep {
    /// Send this datagram to the server.
    Send(Vec<u8>),
    Complete(FullStat),
    /// The datagram doesn't belong to the current phase of this session.
    Ignore,
}

/// The two-phase exchange without any I/O.
#[derive(Debug, Clone)]
pub struct QuerySession {
    state: QueryState,
    token_encoding: TokenEncoding,
}

impl QuerySession {
    /// Starts a session and returns the handshake datagram to send.
    pub fn start(session_id: u32, token_encoding: TokenEncoding) -> (Self, [u8; 7]) {
        let session = Self {
            state: QueryState::HandshakeSent { session_id },
            token_encoding,
        };
        (session, handshake_packet(session_id))
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn on_datagram(&mut self, datagram: &[u8]) -> Result<QueryStep, PingError> {
        let Some(header) = datagram.get(..HEADER_LEN) else {
            return Ok(QueryStep::Ignore);
        };
        let kind = header[0];
        let echoed = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

        match self.state {
            QueryState::HandshakeSent { session_id }
                if kind == HANDSHAKE_TYPE && echoed == session_id =>
            {
                let token = parse_token(datagram)?;
                self.state = QueryState::StatsRequested { session_id, token };
                Ok(QueryStep::Send(full_stat_packet(
                    session_id,
                    token,
                    self.token_encoding,
                )))
            }
            QueryState::StatsRequested { session_id, .. }
                if kind == STAT_TYPE && echoed == session_id =>
            {
                self.state = QueryState::Complete;
                Ok(QueryStep::Complete(parse_stat_block(datagram)))
            }
            _ => Ok(QueryStep::Ignore),
        }
    }
}

/// Runs the handshake and full stat request against a query port.
pub async fn query_full(host: &str, port: u16, options: &Options) -> Result<FullStat, PingError> {
    net::with_deadline(options.timeout, async {
        let socket = net::connect_udp(host, port).await?;
        let (mut session, handshake) =
            QuerySession::start(generate_session_id(), options.token_encoding);
        socket.send(&handshake).await?;
        trace!("{host}:{port}: sent query handshake {:?}", session.state());

        let mut buf = vec![0u8; 65_536];
        loop {
            let n = socket.recv(&mut buf).await?;
            match session.on_datagram(&buf[..n])? {
                QueryStep::Send(request) => {
                    socket.send(&request).await?;
                    trace!("{host}:{port}: sent full stat request");
                }
                QueryStep::Complete(stat) => {
                    debug!("{host}:{port}: {} query values", stat.values.len());
                    return Ok(stat);
                }
                QueryStep::Ignore => {
                    debug!("{host}:{port}: ignoring {n} byte datagram in {:?}", session.state());
                }
            }
        }
    })
    .await
    .inspect_err(|err| debug!("{host}:{port}: query failed: {err}"))
}
