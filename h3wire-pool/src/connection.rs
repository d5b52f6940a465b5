//! Pooled HTTP/3 connections and the transport seams the pool drives.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use h3wire::{H3Config, H3Event};
use http::HeaderMap;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::budget::{StreamBudget, StreamPermit};
use crate::discovery::Discovery;
use crate::origin::{Endpoint, Origin};

/// An established QUIC session carrying HTTP/3.
pub trait QuicSession: Send + Sync {
    /// Initial bidirectional stream limit granted by the peer.
    fn max_bidi_streams(&self) -> u64;

    /// Whether the transport is still usable.
    fn is_open(&self) -> bool;

    /// Tell the peer the client is blocked at `limit` (STREAMS_BLOCKED).
    fn streams_blocked(&self, limit: u64);
}

/// Opens QUIC sessions.
///
/// # Contract
///
/// - `origin` is the identity the TLS handshake authenticates
/// - `endpoint` is where the packets go; it differs from the origin's
///   authority for alternative services
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        origin: &Origin,
        endpoint: &Endpoint,
        h3: &H3Config,
    ) -> io::Result<Arc<dyn QuicSession>>;
}

/// Performs the precursor exchange that teaches the pool about an origin's
/// alternative services: typically a lightweight request over HTTP/1.1 or
/// HTTP/2 whose response headers are returned.
#[async_trait]
pub trait AltSvcDiscoverer: Send + Sync {
    async fn discover(&self, origin: &Origin) -> io::Result<HeaderMap>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    Established,
    /// GOAWAY received; existing streams finish, no new ones are admitted.
    Draining { goaway_id: u64 },
    Closed { cause: String },
}

pub struct PooledConnection {
    label: String,
    origin: Origin,
    endpoint: Endpoint,
    discovery: Discovery,
    session: Arc<dyn QuicSession>,
    budget: Arc<StreamBudget>,
    state: Mutex<ConnectionState>,
}

impl PooledConnection {
    pub fn new(
        label: String,
        origin: Origin,
        endpoint: Endpoint,
        discovery: Discovery,
        session: Arc<dyn QuicSession>,
    ) -> Self {
        let budget = StreamBudget::new(session.max_bidi_streams());
        Self {
            label,
            origin,
            endpoint,
            discovery,
            session,
            budget,
            state: Mutex::new(ConnectionState::Opening),
        }
    }

    /// Human-readable name, unique within the owning pool.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn budget(&self) -> &Arc<StreamBudget> {
        &self.budget
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    /// Whether new requests may be admitted.
    pub fn is_usable(&self) -> bool {
        matches!(*self.state.lock(), ConnectionState::Established) && self.session.is_open()
    }

    /// Whether the connection is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), ConnectionState::Closed { .. }) || !self.session.is_open()
    }

    pub fn mark_established(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Opening {
            *state = ConnectionState::Established;
            debug!(label = %self.label, discovery = %self.discovery, "connection established");
        }
    }

    pub fn on_goaway(&self, goaway_id: u64) {
        let mut state = self.state.lock();
        if !matches!(*state, ConnectionState::Closed { .. }) {
            info!(label = %self.label, goaway_id, "connection draining");
            *state = ConnectionState::Draining { goaway_id };
        }
    }

    pub fn on_closed(&self, cause: impl Into<String>) {
        let cause = cause.into();
        info!(label = %self.label, cause = %cause, "connection closed");
        *self.state.lock() = ConnectionState::Closed { cause };
    }

    /// Apply a MAX_STREAMS update from the peer.
    pub fn on_max_streams(&self, limit: u64) {
        self.budget.raise_limit(limit);
    }

    /// Feed the connection-level events of the HTTP/3 layer that affect
    /// admission.
    pub fn on_event(&self, event: &H3Event) {
        match event {
            H3Event::GoAway { id } => self.on_goaway(*id),
            H3Event::Closed { code, reason } => self.on_closed(format!("{code}: {reason}")),
            _ => {}
        }
    }

    /// Reserve a stream slot without waiting. An exhausted budget is
    /// reported to the peer once per limit.
    pub fn try_reserve(&self) -> Option<StreamPermit> {
        if let Some(permit) = self.budget.try_reserve() {
            return Some(permit);
        }
        if let Some(limit) = self.budget.mark_blocked() {
            trace!(label = %self.label, limit, "streams blocked");
            self.session.streams_blocked(limit);
        }
        None
    }

    /// Reserve a stream slot, waiting up to `wait` for the peer to raise
    /// the limit.
    pub async fn reserve(&self, wait: Duration) -> Option<StreamPermit> {
        if let Some(permit) = self.try_reserve() {
            return Some(permit);
        }
        if wait.is_zero() {
            return None;
        }
        trace!(label = %self.label, wait_ms = wait.as_millis() as u64, "waiting for stream credit");
        self.budget.reserve(wait).await
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("label", &self.label)
            .field("origin", &self.origin)
            .field("endpoint", &self.endpoint)
            .field("discovery", &self.discovery)
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// A stream slot reserved on a pooled connection for one request.
#[derive(Debug)]
pub struct StreamLease {
    connection: Arc<PooledConnection>,
    permit: StreamPermit,
}

impl StreamLease {
    pub(crate) fn new(connection: Arc<PooledConnection>, permit: StreamPermit) -> Self {
        Self { connection, permit }
    }

    pub fn label(&self) -> &str {
        self.connection.label()
    }

    pub fn connection(&self) -> &Arc<PooledConnection> {
        &self.connection
    }

    /// The request opened its stream; the slot stays consumed.
    pub fn commit(self) -> Arc<PooledConnection> {
        self.permit.commit();
        self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h3wire::ErrorCode;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct Session {
        limit: u64,
        open: AtomicBool,
        blocked: AtomicU64,
    }

    impl QuicSession for Session {
        fn max_bidi_streams(&self) -> u64 {
            self.limit
        }
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        fn streams_blocked(&self, _limit: u64) {
            self.blocked.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connection(limit: u64) -> (PooledConnection, Arc<Session>) {
        let session = Arc::new(Session {
            limit,
            open: AtomicBool::new(true),
            blocked: AtomicU64::new(0),
        });
        let origin = Origin::new("https", "example.com", 443);
        let conn = PooledConnection::new(
            "h3(1)".into(),
            origin.clone(),
            origin.endpoint(),
            Discovery::Direct,
            session.clone(),
        );
        (conn, session)
    }

    #[test]
    fn test_lifecycle() {
        let (conn, _session) = connection(1);
        assert_eq!(conn.state(), ConnectionState::Opening);
        assert!(!conn.is_usable());

        conn.mark_established();
        assert!(conn.is_usable());

        conn.on_event(&H3Event::GoAway { id: 8 });
        assert_eq!(conn.state(), ConnectionState::Draining { goaway_id: 8 });
        assert!(!conn.is_usable());
        assert!(!conn.is_closed());

        conn.on_event(&H3Event::Closed {
            code: ErrorCode::FrameError,
            reason: "bad".into(),
        });
        assert!(conn.is_closed());
        conn.on_goaway(0);
        assert!(conn.is_closed());

        let (conn, session) = connection(1);
        conn.mark_established();
        session.open.store(false, Ordering::SeqCst);
        assert!(!conn.is_usable());
        assert!(conn.is_closed());
    }

    #[test]
    fn test_blocked_reported_once() {
        let (conn, session) = connection(1);
        conn.mark_established();
        let permit = conn.try_reserve().unwrap();
        assert!(conn.try_reserve().is_none());
        assert!(conn.try_reserve().is_none());
        assert_eq!(session.blocked.load(Ordering::SeqCst), 1);

        permit.commit();
        conn.on_max_streams(2);
        assert!(conn.try_reserve().is_some());
    }
}
