//! Admission errors.

use std::io;

use thiserror::Error;

use crate::origin::{Endpoint, Origin};

/// Result type for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Why a request could not be admitted onto an HTTP/3 connection.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    /// HTTP/3 cannot be used for this request at all (non-https origin,
    /// or the client is configured behind a forward proxy).
    #[error("HTTP/3 is not supported for {0}")]
    UnsupportedProtocolVersion(String),

    #[error("no HTTP/3 alternative service advertised for {0}")]
    NoAltService(Origin),

    #[error("invalid Alt-Svc header: {0}")]
    InvalidAltSvc(String),

    #[error("alternative service discovery for {origin} failed")]
    Discovery {
        origin: Origin,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {endpoint}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("no stream available on {label}")]
    StreamsExhausted { label: String },

    #[error("request deadline elapsed before a stream was admitted")]
    Timeout,

    #[error("connection {0} closed")]
    ConnectionClosed(String),

    #[error("too many connections to {origin} (limit {limit})")]
    TooManyConnections { origin: Origin, limit: usize },
}
