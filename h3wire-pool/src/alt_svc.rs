//! Alt-Svc header handling (RFC 7838).
//!
//! A server reachable over HTTP/3 advertises itself in the `Alt-Svc`
//! response header of an HTTP/1.1 or HTTP/2 exchange:
//!
//! ```text
//! Alt-Svc: h3=":443"; ma=86400, h3="alt.example.com:8443"
//! ```
//!
//! Only `h3` entries are retained. A `clear` value withdraws every
//! advertisement for the origin.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{AdmissionError, Result};
use crate::origin::{Endpoint, Origin};

/// ALPN token for HTTP/3.
pub const ALPN_H3: &str = "h3";

/// Upper bound applied when `now + ma` is not representable.
const MAX_AGE_CAP: Duration = Duration::from_secs(365 * 86400);

/// One `protocol-id="alt-authority"` entry of an Alt-Svc value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltService {
    pub alpn: String,
    /// `None` when the authority omits the host (same host as the origin).
    pub host: Option<String>,
    pub port: u16,
    pub max_age: Duration,
}

impl AltService {
    /// Resolve the endpoint this service points at on behalf of `origin`.
    pub fn endpoint_for(&self, origin: &Origin) -> Endpoint {
        Endpoint::new(self.host.as_deref().unwrap_or(origin.host()), self.port)
    }
}

/// A parsed Alt-Svc field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltSvcValue {
    Clear,
    Services(Vec<AltService>),
}

/// Parse an Alt-Svc field value. Entries without an `ma` parameter expire
/// after `default_max_age`.
pub fn parse(value: &str, default_max_age: Duration) -> Result<AltSvcValue> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("clear") {
        return Ok(AltSvcValue::Clear);
    }

    let mut services = Vec::new();
    for entry in split_unquoted(value, ',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        services.push(parse_entry(entry, default_max_age)?);
    }
    if services.is_empty() {
        return Err(AdmissionError::InvalidAltSvc(value.to_string()));
    }
    Ok(AltSvcValue::Services(services))
}

fn parse_entry(entry: &str, default_max_age: Duration) -> Result<AltService> {
    let invalid = || AdmissionError::InvalidAltSvc(entry.to_string());

    let mut parts = split_unquoted(entry, ';').into_iter();
    let service = parts.next().ok_or_else(invalid)?;
    let (alpn, authority) = service.split_once('=').ok_or_else(invalid)?;
    let alpn = alpn.trim();
    if alpn.is_empty() {
        return Err(invalid());
    }
    let authority = unquote(authority.trim()).ok_or_else(invalid)?;
    let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;

    let mut max_age = default_max_age;
    for param in parts {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("ma") {
            let value = unquote(value.trim()).ok_or_else(invalid)?;
            let secs: u64 = value.parse().map_err(|_| invalid())?;
            max_age = Duration::from_secs(secs);
        }
    }

    Ok(AltService {
        alpn: alpn.to_string(),
        host: (!host.is_empty()).then(|| host.to_string()),
        port,
        max_age,
    })
}

/// Split on `sep` outside of double quotes.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unquote(s: &str) -> Option<&str> {
    match s.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"'),
        None => Some(s),
    }
}

/// Format the Alt-Svc value a server sends to advertise HTTP/3 on `port`
/// of its own host.
pub fn header_value(port: u16, max_age_secs: u64) -> String {
    format!("{ALPN_H3}=\":{port}\"; ma={max_age_secs}")
}

#[derive(Debug, Clone)]
struct Advertised {
    endpoint: Endpoint,
    expires: Instant,
}

/// Known HTTP/3 alternative services, per origin, with max-age expiry.
#[derive(Debug)]
pub struct AltSvcRegistry {
    default_max_age: Duration,
    entries: Mutex<HashMap<Origin, Vec<Advertised>>>,
}

impl AltSvcRegistry {
    pub fn new(default_max_age: Duration) -> Self {
        Self {
            default_max_age,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record an Alt-Svc header value received from `origin`.
    pub fn update(&self, origin: &Origin, header: &str) -> Result<()> {
        let value = parse(header, self.default_max_age)?;
        self.apply(origin, value, Instant::now());
        Ok(())
    }

    /// Apply a parsed value as of `now`. A new value replaces whatever was
    /// previously advertised by the origin.
    pub fn apply(&self, origin: &Origin, value: AltSvcValue, now: Instant) {
        let mut entries = self.entries.lock();
        match value {
            AltSvcValue::Clear => {
                debug!(origin = %origin, "alt-svc cleared");
                entries.remove(origin);
            }
            AltSvcValue::Services(services) => {
                let advertised: Vec<Advertised> = services
                    .iter()
                    .filter(|s| s.alpn == ALPN_H3 && !s.max_age.is_zero())
                    .map(|s| Advertised {
                        endpoint: s.endpoint_for(origin),
                        expires: now
                            .checked_add(s.max_age)
                            .unwrap_or_else(|| now + MAX_AGE_CAP),
                    })
                    .collect();
                trace!(origin = %origin, count = advertised.len(), "alt-svc updated");
                if advertised.is_empty() {
                    entries.remove(origin);
                } else {
                    entries.insert(origin.clone(), advertised);
                }
            }
        }
    }

    /// The first unexpired HTTP/3 endpoint advertised for `origin`.
    pub fn lookup(&self, origin: &Origin) -> Option<Endpoint> {
        self.lookup_at(origin, Instant::now())
    }

    pub fn lookup_at(&self, origin: &Origin, now: Instant) -> Option<Endpoint> {
        let mut entries = self.entries.lock();
        let advertised = entries.get_mut(origin)?;
        advertised.retain(|a| a.expires > now);
        let found = advertised.first().map(|a| a.endpoint.clone());
        if found.is_none() {
            entries.remove(origin);
        }
        found
    }

    pub fn clear(&self, origin: &Origin) {
        self.entries.lock().remove(origin);
    }
}
