use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Protocol version sent in the SLP handshake when asking for status only.
pub const STATUS_PROTOCOL_VERSION: i32 = -1;

/// How the challenge token is written into a full stat request.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenEncoding {
    /// The decimal digits of the token, as text.
    #[default]
    Ascii,
    /// The token as a 4-byte big-endian integer, which is what vanilla servers
    /// read.
    BigEndian,
}

/// Per-call settings shared by every exchange.
#[derive(Debug, Clone)]
pub struct Options {
    /// Deadline for the whole exchange, connect included.
    pub timeout: Duration,
    pub protocol_version: i32,
    /// Address written into the SLP handshake. Some proxies route on it, so it
    /// can differ from the host we actually connect to. Defaults to the
    /// connected host.
    pub hostname: Option<String>,
    pub token_encoding: TokenEncoding,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            protocol_version: STATUS_PROTOCOL_VERSION,
            hostname: None,
            token_encoding: TokenEncoding::default(),
        }
    }
}

impl Options {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn handshake_hostname<'a>(&'a self, host: &'a str) -> &'a str {
        self.hostname.as_deref().unwrap_or(host)
    }
}
