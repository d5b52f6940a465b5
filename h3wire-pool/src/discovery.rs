//! How a request may find its HTTP/3 connection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::origin::Endpoint;

/// Per-request discovery intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Connect straight to the URI's authority over QUIC.
    Http3UriOnly,
    /// Only use an endpoint the origin advertised via Alt-Svc, discovering
    /// it first if necessary.
    AltSvc,
    /// Reuse whatever qualifies; otherwise connect directly, falling back
    /// to an already known advertisement. Never triggers discovery.
    #[default]
    Any,
}

/// How a pooled connection was discovered. Connections with different
/// discovery are distinct pool entries even when they share an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Discovery {
    Direct,
    /// Advertised by the origin in an Alt-Svc header.
    AltService { endpoint: Endpoint },
}

impl Discovery {
    /// Whether a connection discovered this way may carry a request with
    /// the given intent.
    pub fn qualifies_for(&self, mode: DiscoveryMode) -> bool {
        match (mode, self) {
            (DiscoveryMode::Any, _) => true,
            (DiscoveryMode::Http3UriOnly, Discovery::Direct) => true,
            (DiscoveryMode::AltSvc, Discovery::AltService { .. }) => true,
            _ => false,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Discovery::Direct)
    }
}

impl fmt::Display for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discovery::Direct => f.write_str("direct"),
            Discovery::AltService { endpoint } => write!(f, "alt-svc({endpoint})"),
        }
    }
}
