//! The link port between the client and the companion process.

use async_trait::async_trait;

use crate::framing::FramingError;

/// A byte-level connection to the companion.
///
/// `send` writes one already-framed message. `recv` yields whatever bytes
/// arrived next; the caller reassembles frames. Implementations must allow
/// `send` and `recv` to run concurrently from different tasks.
#[async_trait]
pub trait Link: Send + Sync {
    /// Open the underlying connection.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Write one framed message.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Next chunk of inbound bytes, or `None` at end of stream.
    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Tear the connection down. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Common transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Malformed message: {0}")]
    Codec(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}
