//! Test doubles for the transport seams of the pool.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use h3wire::H3Config;
use h3wire_pool::{AltSvcDiscoverer, Connector, Endpoint, Origin, PoolConfig, QuicSession};
use http::{HeaderMap, HeaderValue};
use parking_lot::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(stream_limit_timeout_ms: u64) -> PoolConfig {
    PoolConfig {
        stream_limit_timeout_ms,
        ..PoolConfig::default()
    }
}

pub fn origin() -> Origin {
    Origin::new("https", "example.com", 443)
}

#[derive(Debug)]
pub struct MockSession {
    pub limit: u64,
    pub open: AtomicBool,
    pub blocked: AtomicU64,
}

impl QuicSession for MockSession {
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

/// Hands out sessions with a fixed stream limit and records every connect.
#[derive(Debug)]
pub struct MockConnector {
    pub stream_limit: u64,
    /// Simulated handshake time.
    pub delay: Duration,
    /// Refuse connections to the origin's own authority.
    pub refuse_direct: bool,
    pub connects: Mutex<Vec<Endpoint>>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockConnector {
    pub fn new(stream_limit: u64) -> Arc<Self> {
        Arc::new(Self::build(stream_limit, false))
    }

    pub fn refusing_direct(stream_limit: u64) -> Arc<Self> {
        Arc::new(Self::build(stream_limit, true))
    }

    fn build(stream_limit: u64, refuse_direct: bool) -> Self {
        Self {
            stream_limit,
            delay: Duration::from_millis(10),
            refuse_direct,
            connects: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        origin: &Origin,
        endpoint: &Endpoint,
        _h3: &H3Config,
    ) -> io::Result<Arc<dyn QuicSession>> {
        tokio::time::sleep(self.delay).await;
        if self.refuse_direct && *endpoint == origin.endpoint() {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "udp blocked"));
        }
        self.connects.lock().push(endpoint.clone());
        let session = Arc::new(MockSession {
            limit: self.stream_limit,
            open: AtomicBool::new(true),
            blocked: AtomicU64::new(0),
        });
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// Answers the precursor exchange with a fixed Alt-Svc header.
#[derive(Debug)]
pub struct MockDiscoverer {
    pub alt_svc: Option<&'static str>,
    pub calls: AtomicUsize,
}

impl MockDiscoverer {
    pub fn new(alt_svc: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            alt_svc,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AltSvcDiscoverer for MockDiscoverer {
    async fn discover(&self, _origin: &Origin) -> io::Result<HeaderMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut headers = HeaderMap::new();
        if let Some(value) = self.alt_svc {
            headers.insert(http::header::ALT_SVC, HeaderValue::from_static(value));
        }
        Ok(headers)
    }
}
