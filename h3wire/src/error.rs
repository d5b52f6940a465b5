//! HTTP/3 error codes and the error type shared by every layer of the crate.
//!
//! RFC 9114 Section 8.1 and RFC 9204 Section 6 define the application error
//! codes carried in CONNECTION_CLOSE and RESET_STREAM. A protocol violation
//! detected anywhere in the frame, stream or push layers is surfaced as
//! [`Error::Protocol`] with the code that must be sent to the peer.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::qpack::QpackError;

/// Result type for HTTP/3 wire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP/3 application error codes (RFC 9114 Section 8.1, RFC 9204 Section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ErrorCode {
    /// No error (0x100) - graceful close.
    NoError = 0x100,
    /// General protocol error (0x101).
    GeneralProtocolError = 0x101,
    /// Internal error (0x102).
    InternalError = 0x102,
    /// Stream creation error (0x103) - e.g. a second control stream.
    StreamCreationError = 0x103,
    /// A critical stream was closed (0x104).
    ClosedCriticalStream = 0x104,
    /// Frame not permitted in the current state or on this stream (0x105).
    FrameUnexpected = 0x105,
    /// Frame layout violation (0x106).
    FrameError = 0x106,
    /// Peer is generating excessive load (0x107).
    ExcessiveLoad = 0x107,
    /// Stream or push identifier misuse (0x108).
    IdError = 0x108,
    /// SETTINGS frame payload error (0x109).
    SettingsError = 0x109,
    /// First control frame was not SETTINGS (0x10a).
    MissingSettings = 0x10a,
    /// Request rejected without processing (0x10b).
    RequestRejected = 0x10b,
    /// Request or push cancelled (0x10c).
    RequestCancelled = 0x10c,
    /// Stream terminated before the request was complete (0x10d).
    RequestIncomplete = 0x10d,
    /// Malformed HTTP message (0x10e).
    MessageError = 0x10e,
    /// CONNECT tunnel failure (0x10f).
    ConnectError = 0x10f,
    /// Retry over HTTP/1.1 (0x110).
    VersionFallback = 0x110,
    /// QPACK field section could not be decoded (0x200).
    QpackDecompressionFailed = 0x200,
    /// Invalid instruction on the QPACK encoder stream (0x201).
    QpackEncoderStreamError = 0x201,
    /// Invalid instruction on the QPACK decoder stream (0x202).
    QpackDecoderStreamError = 0x202,
}

impl ErrorCode {
    /// Wire value of this code.
    pub fn as_u64(self) -> u64 {
        self as u64
    }

    /// Map a wire value back to a known code.
    ///
    /// Unknown values (including reserved `0x1f * N + 0x21` codes) yield `None`.
    pub fn from_u64(value: u64) -> Option<Self> {
        let code = match value {
            0x100 => Self::NoError,
            0x101 => Self::GeneralProtocolError,
            0x102 => Self::InternalError,
            0x103 => Self::StreamCreationError,
            0x104 => Self::ClosedCriticalStream,
            0x105 => Self::FrameUnexpected,
            0x106 => Self::FrameError,
            0x107 => Self::ExcessiveLoad,
            0x108 => Self::IdError,
            0x109 => Self::SettingsError,
            0x10a => Self::MissingSettings,
            0x10b => Self::RequestRejected,
            0x10c => Self::RequestCancelled,
            0x10d => Self::RequestIncomplete,
            0x10e => Self::MessageError,
            0x10f => Self::ConnectError,
            0x110 => Self::VersionFallback,
            0x200 => Self::QpackDecompressionFailed,
            0x201 => Self::QpackEncoderStreamError,
            0x202 => Self::QpackDecoderStreamError,
            _ => return None,
        };
        Some(code)
    }

    /// Symbolic name as used in the RFCs.
    pub fn name(self) -> &'static str {
        match self {
            Self::NoError => "H3_NO_ERROR",
            Self::GeneralProtocolError => "H3_GENERAL_PROTOCOL_ERROR",
            Self::InternalError => "H3_INTERNAL_ERROR",
            Self::StreamCreationError => "H3_STREAM_CREATION_ERROR",
            Self::ClosedCriticalStream => "H3_CLOSED_CRITICAL_STREAM",
            Self::FrameUnexpected => "H3_FRAME_UNEXPECTED",
            Self::FrameError => "H3_FRAME_ERROR",
            Self::ExcessiveLoad => "H3_EXCESSIVE_LOAD",
            Self::IdError => "H3_ID_ERROR",
            Self::SettingsError => "H3_SETTINGS_ERROR",
            Self::MissingSettings => "H3_MISSING_SETTINGS",
            Self::RequestRejected => "H3_REQUEST_REJECTED",
            Self::RequestCancelled => "H3_REQUEST_CANCELLED",
            Self::RequestIncomplete => "H3_REQUEST_INCOMPLETE",
            Self::MessageError => "H3_MESSAGE_ERROR",
            Self::ConnectError => "H3_CONNECT_ERROR",
            Self::VersionFallback => "H3_VERSION_FALLBACK",
            Self::QpackDecompressionFailed => "QPACK_DECOMPRESSION_FAILED",
            Self::QpackEncoderStreamError => "QPACK_ENCODER_STREAM_ERROR",
            Self::QpackDecoderStreamError => "QPACK_DECODER_STREAM_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors produced by the HTTP/3 wire layer.
#[derive(Error, Debug)]
pub enum Error {
    /// The peer violated the protocol. Always fatal for the connection.
    #[error("{reason}")]
    Protocol { code: ErrorCode, reason: String },

    /// The QPACK collaborator failed; its code is propagated verbatim.
    #[error("QPACK error: {0}")]
    Qpack(#[from] QpackError),

    /// Transport-level I/O failure, not attributable to the peer's framing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection was already closed with `code`.
    #[error("connection closed ({code})")]
    ConnectionClosed { code: ErrorCode },
}

impl Error {
    /// Build a protocol violation with the given code.
    pub fn protocol(code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Protocol {
            code,
            reason: reason.into(),
        }
    }

    /// The application error code to send to the peer for this error.
    ///
    /// I/O failures carry no peer-visible code and map to `H3_INTERNAL_ERROR`.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol { code, .. } => *code,
            Error::Qpack(e) => e.error_code(),
            Error::Io(_) => ErrorCode::InternalError,
            Error::ConnectionClosed { code } => *code,
        }
    }

    /// True for violations attributable to the peer (protocol or compression).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::Protocol { .. } | Error::Qpack(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for value in (0x100..=0x110).chain(0x200..=0x202) {
            let code = ErrorCode::from_u64(value).unwrap();
            assert_eq!(code.as_u64(), value);
        }
        assert_eq!(ErrorCode::from_u64(0x21), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ErrorCode::FrameError.to_string(), "H3_FRAME_ERROR");
        assert_eq!(
            ErrorCode::QpackDecompressionFailed.to_string(),
            "QPACK_DECOMPRESSION_FAILED"
        );
    }

    #[test]
    fn test_error_classification() {
        let err = Error::protocol(ErrorCode::IdError, "bad id");
        assert_eq!(err.code(), ErrorCode::IdError);
        assert!(err.is_protocol_violation());
        assert_eq!(err.to_string(), "bad id");

        let io = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(io.code(), ErrorCode::InternalError);
        assert!(!io.is_protocol_violation());

        let qpack = Error::from(QpackError::Decompression("bad index".into()));
        assert_eq!(qpack.code(), ErrorCode::QpackDecompressionFailed);
        assert!(qpack.is_protocol_violation());
    }
}
