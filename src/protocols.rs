pub mod legacy;
pub mod query;
pub mod slp;
pub mod varint;

/// The outcome of feeding bytes to an incremental decoder.
///
/// `Incomplete` means the bytes seen so far are a valid prefix and the caller
/// should read more. Data that can never become valid is reported as
/// [`crate::PingError::MalformedResponse`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    Complete(T),
    Incomplete,
}

impl<T> Decoded<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Decoded::Complete(_))
    }
}
