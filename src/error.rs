use std::{io, time::Duration};

/// Everything an exchange can fail with.
///
/// Running out of bytes halfway through a packet is not in here: the decoders
/// report that as [`crate::protocols::Decoded::Incomplete`] and the session
/// keeps reading.
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    /// Refused, reset, unresolvable, unreachable, or closed before a full
    /// response arrived.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),
    #[error("no complete response within {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl PingError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        PingError::MalformedResponse(reason.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PingError::Timeout(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, PingError::Connection(_))
    }
}
