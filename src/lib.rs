//! Client for the three ways of asking a Minecraft server what it is: the
//! modern server list ping, the pre-1.7 legacy ping, and the GameSpy4 query
//! protocol.
//!
//! Every exchange is a single call that owns its socket until it returns.

pub mod config;
pub mod error;
pub mod net;
pub mod options;
pub mod protocols;
pub mod status;
pub mod tracing;

pub use error::PingError;
pub use options::{Options, TokenEncoding};
pub use protocols::{
    legacy::{LegacyStatus, legacy_ping},
    query::{FullStat, query_full},
    slp::{latency_ping, status_query},
};

pub const DEFAULT_PORT: u16 = 25565;
