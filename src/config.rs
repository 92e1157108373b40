use std::time::Duration;

use serde::Deserialize;

use crate::{
    DEFAULT_PORT,
    options::{DEFAULT_TIMEOUT, Options, STATUS_PROTOCOL_VERSION, TokenEncoding},
};

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// If set, debug logs are also written to a daily rolling file in this
    /// directory.
    #[serde(default)]
    pub logging_dir: Option<String>,

    /// How long each exchange gets in total, connect included. Defaults to 5
    /// seconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Protocol version to send in the status handshake. Defaults to -1, which
    /// servers treat as "just asking".
    #[serde(default)]
    pub protocol_version: Option<i32>,

    pub targets: Vec<TargetConfig>,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Status,
    Latency,
    Legacy,
    Query,
}

impl ExchangeKind {
    pub const ALL: [ExchangeKind; 4] = [
        ExchangeKind::Status,
        ExchangeKind::Latency,
        ExchangeKind::Legacy,
        ExchangeKind::Query,
    ];
}

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub addr: String,
    #[serde(default)]
    pub port: Option<u16>,

    /// Query isn't discovered from anywhere, so if the server has
    /// `query.port` set to something else it has to be given here. Defaults to
    /// `port`.
    #[serde(default)]
    pub query_port: Option<u16>,

    /// Address to put in the handshake, for servers behind proxies that route
    /// on it.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Which exchanges to run. Defaults to all of them.
    #[serde(default)]
    pub kinds: Option<Vec<ExchangeKind>>,

    #[serde(default)]
    pub token_encoding: TokenEncoding,
}

impl Config {
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

impl TargetConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn query_port(&self) -> u16 {
        self.query_port.unwrap_or_else(|| self.port())
    }

    pub fn kinds(&self) -> Vec<ExchangeKind> {
        self.kinds
            .clone()
            .unwrap_or_else(|| ExchangeKind::ALL.to_vec())
    }

    pub fn options(&self, config: &Config) -> Options {
        Options {
            timeout: config.timeout(),
            protocol_version: config.protocol_version.unwrap_or(STATUS_PROTOCOL_VERSION),
            hostname: self.hostname.clone(),
            token_encoding: self.token_encoding,
        }
    }
}
