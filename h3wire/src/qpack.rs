//! Seam to the QPACK header compression service (RFC 9204).
//!
//! QPACK itself lives outside this crate. The connection hands encoded field
//! sections and encoder/decoder stream bytes to a [`QpackCodec`] and maps any
//! failure to the matching QPACK error code.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use crate::error::ErrorCode;
use crate::StreamId;

/// One name/value line of a field section.
#[derive(Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size as counted against SETTINGS_MAX_FIELD_SECTION_SIZE
    /// (RFC 9114 Section 4.2.2).
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HeaderField")
            .field(&String::from_utf8_lossy(&self.name))
            .field(&String::from_utf8_lossy(&self.value))
            .finish()
    }
}

impl From<(&'static str, &'static str)> for HeaderField {
    fn from((name, value): (&'static str, &'static str)) -> Self {
        Self::new(name, value)
    }
}

/// Failures reported by the QPACK collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QpackError {
    #[error("QPACK field section rejected: {0}")]
    Decompression(String),

    #[error("QPACK encoder stream: {0}")]
    EncoderStream(String),

    #[error("QPACK decoder stream: {0}")]
    DecoderStream(String),
}

impl QpackError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            QpackError::Decompression(_) => ErrorCode::QpackDecompressionFailed,
            QpackError::EncoderStream(_) => ErrorCode::QpackEncoderStreamError,
            QpackError::DecoderStream(_) => ErrorCode::QpackDecoderStreamError,
        }
    }
}

/// Header compression service used by [`crate::H3Connection`].
pub trait QpackCodec: Send {
    /// Encode a field section for `stream_id`.
    fn encode_field_section(
        &mut self,
        stream_id: StreamId,
        fields: &[HeaderField],
    ) -> Result<Bytes, QpackError>;

    /// Decode a field section received on `stream_id`.
    fn decode_field_section(
        &mut self,
        stream_id: StreamId,
        encoded: &[u8],
    ) -> Result<Vec<HeaderField>, QpackError>;

    /// Bytes received on the peer's encoder stream.
    fn on_encoder_stream_data(&mut self, data: &[u8]) -> Result<(), QpackError>;

    /// Bytes received on the peer's decoder stream.
    fn on_decoder_stream_data(&mut self, data: &[u8]) -> Result<(), QpackError>;
}
