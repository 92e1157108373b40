//! The ping used by servers before 1.7.
//!
//! The client sends `FE 01` and the server answers with a kick packet: `FF`, a
//! big-endian u16 character count, then UTF-16BE text whose fields are split by
//! NUL.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{PingError, net, options::Options};

pub const PROBE: [u8; 2] = [0xFE, 0x01];
pub const RESPONSE_MARKER: u8 = 0xFF;
/// Marker byte plus the u16 length.
const HEADER_LEN: usize = 3;
const MODERN_TAG: &str = "§1";

/// What a legacy server told us. Fields are kept as text because older servers
/// don't always send numbers where you'd expect them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacyStatus {
    pub tag: Option<String>,
    pub protocol: Option<String>,
    pub version: Option<String>,
    pub motd: Option<String>,
    pub online: Option<String>,
    pub max: Option<String>,
}

impl LegacyStatus {
    pub fn protocol_number(&self) -> Option<i32> {
        self.protocol.as_deref()?.parse().ok()
    }

    pub fn online_players(&self) -> Option<u32> {
        self.online.as_deref()?.parse().ok()
    }

    pub fn max_players(&self) -> Option<u32> {
        self.max.as_deref()?.parse().ok()
    }

    fn from_fields<'a>(mut fields: impl Iterator<Item = &'a str>) -> Self {
        let mut next = || fields.next().map(str::to_string);
        Self {
            tag: next(),
            protocol: next(),
            version: next(),
            motd: next(),
            online: next(),
            max: next(),
        }
    }
}

fn decode_ucs2(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units)
}

/// Never fails. Whatever fields are present are filled in by position and the
/// rest are left as `None`.
///
/// Servers from 1.4 on send `§1\0protocol\0version\0motd\0online\0max`. Older
/// ones (beta 1.8 to 1.3) send `motd§online§max`, which is read into the motd,
/// online and max fields. Only text with no NUL that doesn't start with the
/// `§1` tag is taken to be the older format.
pub fn parse_best_effort(response: &[u8]) -> LegacyStatus {
    let text = decode_ucs2(response.get(HEADER_LEN..).unwrap_or_default());
    if text.is_empty() {
        return LegacyStatus::default();
    }

    if text.contains('\0') || text.starts_with(MODERN_TAG) {
        return LegacyStatus::from_fields(text.split('\0'));
    }

    let mut parts = text.split('§').map(str::to_string);
    LegacyStatus {
        motd: parts.next(),
        online: parts.next(),
        max: parts.next(),
        ..Default::default()
    }
}

/// Like [`parse_best_effort`] but only accepts a complete 1.4+ response.
pub fn parse_strict(response: &[u8]) -> Result<LegacyStatus, PingError> {
    let [marker, len_hi, len_lo, text @ ..] = response else {
        return Err(PingError::malformed("legacy response is shorter than its header"));
    };
    if *marker != RESPONSE_MARKER {
        return Err(PingError::malformed(format!(
            "expected legacy marker 0xff, got 0x{marker:02x}"
        )));
    }
    let length = u16::from_be_bytes([*len_hi, *len_lo]) as usize;
    if text.len() != length * 2 {
        return Err(PingError::malformed(format!(
            "legacy response says {length} characters but carries {} bytes",
            text.len()
        )));
    }

    let text = decode_ucs2(text);
    let fields = text.split('\0').collect::<Vec<_>>();
    if fields.first() != Some(&MODERN_TAG) {
        return Err(PingError::malformed("legacy response is missing the §1 tag"));
    }
    if fields.len() != 6 {
        return Err(PingError::malformed(format!(
            "legacy response has {} fields, expected 6",
            fields.len()
        )));
    }
    Ok(LegacyStatus::from_fields(fields.into_iter()))
}

/// Pings a pre-1.7 server. Only the first chunk the server writes is looked
/// at; servers send the whole kick packet in one go.
pub async fn legacy_ping(
    host: &str,
    port: u16,
    options: &Options,
) -> Result<LegacyStatus, PingError> {
    net::with_deadline(options.timeout, async {
        let mut stream = net::connect_tcp(host, port).await?;
        stream.write_all(&PROBE).await?;
        stream.flush().await?;
        trace!("{host}:{port}: sent legacy probe");

        let mut response = [0u8; 4096];
        let n = stream.read(&mut response).await?;
        drop(stream);
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed without a legacy response",
            )
            .into());
        }

        debug!("{host}:{port}: {n} byte legacy response");
        Ok(parse_best_effort(&response[..n]))
    })
    .await
    .inspect_err(|err| debug!("{host}:{port}: legacy ping failed: {err}"))
}
