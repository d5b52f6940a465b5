//! Request origins and network endpoints.

use std::fmt;

use http::Uri;

use crate::error::{AdmissionError, Result};

/// The (scheme, host, port) triple a request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// Extract the origin of an absolute URI. A missing port is filled in
    /// from the scheme's default.
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| AdmissionError::InvalidOrigin(format!("{uri}: missing scheme")))?;
        let host = uri
            .host()
            .ok_or_else(|| AdmissionError::InvalidOrigin(format!("{uri}: missing host")))?;
        let port = match uri.port_u16() {
            Some(port) => port,
            None => default_port(scheme)
                .ok_or_else(|| AdmissionError::InvalidOrigin(format!("{uri}: unknown scheme")))?,
        };
        Ok(Self::new(scheme, host, port))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// HTTP/3 is only spoken for `https` origins.
    pub fn is_h3_eligible(&self) -> bool {
        self.scheme == "https"
    }

    /// The endpoint a direct connection to this origin targets.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.host, self.port)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme.to_ascii_lowercase().as_str() {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    }
}

/// A UDP host/port pair a QUIC connection is opened to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
