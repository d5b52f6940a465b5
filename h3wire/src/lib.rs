//! HTTP/3 wire layer.
//!
//! Sans-IO building blocks for HTTP/3 over QUIC (RFC 9114): variable-length
//! integers, an incremental frame decoder, the unidirectional stream type
//! dispatcher, push ID bookkeeping, and [`H3Connection`], which ties them
//! together into the connection-level state machine. The QUIC transport and
//! QPACK are supplied by the caller; bytes go in, frames and events come out.

pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod push;
pub mod qpack;
pub mod settings;
pub mod stream_type;
pub mod varint;

pub use config::H3Config;
pub use connection::{H3Connection, H3Event};
pub use decoder::FrameDecoder;
pub use error::{Error, ErrorCode, Result};
pub use frame::{Frame, FrameKind, MalformedFrame};
pub use push::{PushEvent, PushIdRequest, PushManager};
pub use qpack::{HeaderField, QpackCodec, QpackError};
pub use settings::{ConnectionSettings, SettingsFrame};
pub use stream_type::{StreamRole, StreamType, StreamTypeDispatcher};

/// QUIC stream identifier (RFC 9000 Section 2.1). Bit 0 is the initiator
/// (0 = client), bit 1 the directionality (0 = bidirectional).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    pub fn is_client_initiated(&self) -> bool {
        self.0 & 0b01 == 0
    }

    pub fn is_server_initiated(&self) -> bool {
        self.0 & 0b01 == 1
    }

    pub fn is_bidirectional(&self) -> bool {
        self.0 & 0b10 == 0
    }

    pub fn is_unidirectional(&self) -> bool {
        self.0 & 0b10 != 0
    }

    /// Whether the endpoint on `side` opened this stream.
    pub fn is_initiated_by(&self, side: Side) -> bool {
        match side {
            Side::Client => self.is_client_initiated(),
            Side::Server => self.is_server_initiated(),
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which end of the connection this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}
