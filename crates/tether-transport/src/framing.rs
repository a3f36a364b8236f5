//! Message framing over byte streams.
//!
//! The companion speaks browser native-messaging framing by default: a
//! 4-byte length in native byte order followed by the payload. Links that
//! already keep message boundaries use [`Passthrough`].

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Maximum frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const PREFIX_LEN: usize = 4;

/// Framing error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("Frame too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),
}

/// Wraps outbound payloads and recovers inbound ones from a byte stream.
pub trait Framing: Send + Sync {
    /// Frame one payload.
    fn wrap(&self, payload: &[u8]) -> Result<Vec<u8>, FramingError>;

    /// Streaming decoder for partial reads.
    /// Returns Some(data) when a complete frame is available, None if more data needed.
    fn unwrap(&self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, FramingError>;
}

/// Byte order of the length prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Native,
    Big,
}

/// Length-prefixed frame codec
#[derive(Clone, Debug)]
pub struct LengthPrefixed {
    max_frame_size: usize,
    order: ByteOrder,
}

impl LengthPrefixed {
    pub fn new(order: ByteOrder, max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            order,
        }
    }

    /// Native-endian prefix, as used by browser native messaging.
    pub fn native() -> Self {
        Self::new(ByteOrder::Native, MAX_FRAME_SIZE)
    }

    pub fn big_endian() -> Self {
        Self::new(ByteOrder::Big, MAX_FRAME_SIZE)
    }

    fn encode_len(&self, len: u32) -> [u8; PREFIX_LEN] {
        match self.order {
            ByteOrder::Native => len.to_ne_bytes(),
            ByteOrder::Big => len.to_be_bytes(),
        }
    }

    fn decode_len(&self, prefix: [u8; PREFIX_LEN]) -> usize {
        match self.order {
            ByteOrder::Native => u32::from_ne_bytes(prefix) as usize,
            ByteOrder::Big => u32::from_be_bytes(prefix) as usize,
        }
    }

    /// Decode exactly one complete frame.
    pub fn decode(&self, framed: &[u8]) -> Result<Vec<u8>, FramingError> {
        if framed.len() < PREFIX_LEN {
            return Err(FramingError::Incomplete(PREFIX_LEN - framed.len()));
        }
        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&framed[..PREFIX_LEN]);
        let len = self.decode_len(prefix);

        if len > self.max_frame_size {
            return Err(FramingError::TooLarge(len, self.max_frame_size));
        }

        let body = &framed[PREFIX_LEN..];
        if body.len() < len {
            return Err(FramingError::Incomplete(len - body.len()));
        }
        Ok(body[..len].to_vec())
    }
}

impl Default for LengthPrefixed {
    fn default() -> Self {
        Self::native()
    }
}

impl Framing for LengthPrefixed {
    fn wrap(&self, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
        if payload.len() > self.max_frame_size {
            return Err(FramingError::TooLarge(payload.len(), self.max_frame_size));
        }

        let mut encoded = Vec::with_capacity(PREFIX_LEN + payload.len());
        encoded.extend_from_slice(&self.encode_len(payload.len() as u32));
        encoded.extend_from_slice(payload);
        Ok(encoded)
    }

    fn unwrap(&self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, FramingError> {
        if buf.len() < PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&buf[..PREFIX_LEN]);
        let len = self.decode_len(prefix);

        if len > self.max_frame_size {
            return Err(FramingError::TooLarge(len, self.max_frame_size));
        }

        if buf.len() < PREFIX_LEN + len {
            return Ok(None);
        }

        buf.advance(PREFIX_LEN);
        Ok(Some(buf.split_to(len).to_vec()))
    }
}

/// Identity framing for message-preserving links.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl Framing for Passthrough {
    fn wrap(&self, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
        Ok(payload.to_vec())
    }

    fn unwrap(&self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, FramingError> {
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(buf.split().to_vec()))
    }
}

/// Framing selector used in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingKind {
    #[default]
    LengthNative,
    LengthBigEndian,
    Passthrough,
}

impl FramingKind {
    pub fn build(self) -> Arc<dyn Framing> {
        match self {
            FramingKind::LengthNative => Arc::new(LengthPrefixed::native()),
            FramingKind::LengthBigEndian => Arc::new(LengthPrefixed::big_endian()),
            FramingKind::Passthrough => Arc::new(Passthrough),
        }
    }
}
