//! Connection admission.
//!
//! [`ConnectionPool`] decides, per request, which HTTP/3 connection carries
//! it: an existing connection whose discovery matches the request's
//! [`DiscoveryMode`], or a new one. Concurrent requests for the same origin
//! serialize connection creation on a per-origin lock, so they converge on
//! one connection instead of racing to open several.
//!
//! When a connection runs out of bidirectional stream credit, a request
//! waits up to `stream_limit_timeout_ms` for the peer to raise the limit
//! and then fails over to another connection to the same origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http::Uri;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alt_svc::AltSvcRegistry;
use crate::config::PoolConfig;
use crate::connection::{AltSvcDiscoverer, Connector, PooledConnection, StreamLease};
use crate::discovery::{Discovery, DiscoveryMode};
use crate::error::{AdmissionError, Result};
use crate::origin::{Endpoint, Origin};

/// Outcome of a non-blocking selection.
#[derive(Debug)]
pub enum Selection {
    /// A qualifying connection had stream credit.
    Ready(StreamLease),
    /// Qualifying connections exist but none has stream credit; this is
    /// the most recently created of them. Under [`DiscoveryMode::Any`]
    /// direct connections are tried first.
    Blocked(Arc<PooledConnection>),
    /// No qualifying connection exists.
    NeedsCreate,
}

pub struct ConnectionPool {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    discoverer: Option<Arc<dyn AltSvcDiscoverer>>,
    alt_svc: AltSvcRegistry,
    connections: Mutex<HashMap<Origin, Vec<Arc<PooledConnection>>>>,
    creation_locks: Mutex<HashMap<Origin, Arc<AsyncMutex<()>>>>,
    next_label: AtomicU64,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let alt_svc = AltSvcRegistry::new(config.alt_svc_default_max_age());
        Self {
            config,
            connector,
            discoverer: None,
            alt_svc,
            connections: Mutex::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
            next_label: AtomicU64::new(1),
        }
    }

    /// Enable the precursor exchange for [`DiscoveryMode::AltSvc`] requests.
    pub fn with_discoverer(mut self, discoverer: Arc<dyn AltSvcDiscoverer>) -> Self {
        self.discoverer = Some(discoverer);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn alt_svc(&self) -> &AltSvcRegistry {
        &self.alt_svc
    }

    /// Record an Alt-Svc header seen on a non-HTTP/3 response from `origin`.
    pub fn on_alt_svc(&self, origin: &Origin, header: &str) -> Result<()> {
        self.alt_svc.update(origin, header)
    }

    /// Connections currently pooled for `origin`, oldest first.
    pub fn connections(&self, origin: &Origin) -> Vec<Arc<PooledConnection>> {
        self.connections
            .lock()
            .get(origin)
            .cloned()
            .unwrap_or_default()
    }

    /// Pick a connection for `origin` without waiting or connecting.
    pub fn select(&self, origin: &Origin, mode: DiscoveryMode) -> Selection {
        let candidates = self.candidates(origin, mode);
        let Some(newest) = candidates.last() else {
            return Selection::NeedsCreate;
        };

        let mut order: Vec<_> = candidates.iter().collect();
        if mode == DiscoveryMode::Any {
            order.sort_by_key(|conn| !conn.discovery().is_direct());
        }
        for conn in order {
            if let Some(permit) = conn.try_reserve() {
                return Selection::Ready(StreamLease::new(Arc::clone(conn), permit));
            }
        }
        Selection::Blocked(Arc::clone(newest))
    }

    /// Admit a request for `uri` onto a connection, creating one if needed.
    pub async fn acquire(&self, uri: &Uri, mode: DiscoveryMode) -> Result<StreamLease> {
        let origin = Origin::from_uri(uri)?;
        self.check_supported(&origin)?;

        match self.select(&origin, mode) {
            Selection::Ready(lease) => return Ok(lease),
            Selection::Blocked(conn) => {
                let wait = self.config.stream_limit_timeout();
                if let Some(permit) = conn.reserve(wait).await {
                    if conn.is_usable() {
                        return Ok(StreamLease::new(conn, permit));
                    }
                }
                debug!(
                    origin = %origin,
                    label = %conn.label(),
                    "stream limit reached, failing over"
                );
            }
            Selection::NeedsCreate => {}
        }

        self.create(&origin, mode).await
    }

    /// [`acquire`](Self::acquire) bounded by an overall request deadline.
    /// The deadline does not shorten the stream-limit wait itself.
    pub async fn acquire_until(
        &self,
        uri: &Uri,
        mode: DiscoveryMode,
        deadline: Instant,
    ) -> Result<StreamLease> {
        tokio::time::timeout_at(deadline, self.acquire(uri, mode))
            .await
            .unwrap_or(Err(AdmissionError::Timeout))
    }

    fn check_supported(&self, origin: &Origin) -> Result<()> {
        if let Some(proxy) = &self.config.forward_proxy {
            return Err(AdmissionError::UnsupportedProtocolVersion(format!(
                "{origin} through proxy {proxy}"
            )));
        }
        if !origin.is_h3_eligible() {
            return Err(AdmissionError::UnsupportedProtocolVersion(origin.to_string()));
        }
        Ok(())
    }

    /// Usable connections qualifying for `mode`, oldest first. Closed
    /// connections are evicted on the way.
    fn candidates(&self, origin: &Origin, mode: DiscoveryMode) -> Vec<Arc<PooledConnection>> {
        let mut connections = self.connections.lock();
        let Some(pooled) = connections.get_mut(origin) else {
            return Vec::new();
        };
        pooled.retain(|conn| !conn.is_closed());

        pooled
            .iter()
            .filter(|conn| conn.is_usable() && conn.discovery().qualifies_for(mode))
            .cloned()
            .collect()
    }

    fn creation_lock(&self, origin: &Origin) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.creation_locks.lock().entry(origin.clone()).or_default())
    }

    async fn create(&self, origin: &Origin, mode: DiscoveryMode) -> Result<StreamLease> {
        let lock = self.creation_lock(origin);
        let guard = lock.lock().await;

        // Another request may have created a connection while this one
        // waited for the lock.
        if let Selection::Ready(lease) = self.select(origin, mode) {
            return Ok(lease);
        }

        let conn = match mode {
            DiscoveryMode::Http3UriOnly => {
                self.open(origin, origin.endpoint(), Discovery::Direct).await?
            }
            DiscoveryMode::AltSvc => {
                let endpoint = self.alt_service_for(origin).await?;
                self.open_alt_service(origin, endpoint).await?
            }
            DiscoveryMode::Any => match self.open(origin, origin.endpoint(), Discovery::Direct).await {
                Ok(conn) => conn,
                Err(err @ AdmissionError::Connect { .. }) => match self.alt_svc.lookup(origin) {
                    Some(endpoint) => {
                        debug!(origin = %origin, error = %err, "direct connect failed, using known alt-svc");
                        self.open_alt_service(origin, endpoint).await?
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            },
        };

        if let Some(permit) = conn.try_reserve() {
            return Ok(StreamLease::new(conn, permit));
        }
        drop(guard);

        match conn.reserve(self.config.stream_limit_timeout()).await {
            Some(permit) => Ok(StreamLease::new(conn, permit)),
            None => Err(AdmissionError::StreamsExhausted {
                label: conn.label().to_string(),
            }),
        }
    }

    /// The advertised HTTP/3 endpoint for `origin`, running the precursor
    /// exchange if none is known yet.
    async fn alt_service_for(&self, origin: &Origin) -> Result<Endpoint> {
        if let Some(endpoint) = self.alt_svc.lookup(origin) {
            return Ok(endpoint);
        }
        let Some(discoverer) = &self.discoverer else {
            return Err(AdmissionError::NoAltService(origin.clone()));
        };

        debug!(origin = %origin, "discovering alternative services");
        let headers = discoverer
            .discover(origin)
            .await
            .map_err(|source| AdmissionError::Discovery {
                origin: origin.clone(),
                source,
            })?;

        let values: Vec<&str> = headers
            .get_all(http::header::ALT_SVC)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if !values.is_empty() {
            if let Err(e) = self.alt_svc.update(origin, &values.join(", ")) {
                warn!(origin = %origin, error = %e, "ignoring Alt-Svc header");
            }
        }

        self.alt_svc
            .lookup(origin)
            .ok_or_else(|| AdmissionError::NoAltService(origin.clone()))
    }

    async fn open_alt_service(
        &self,
        origin: &Origin,
        endpoint: Endpoint,
    ) -> Result<Arc<PooledConnection>> {
        let discovery = Discovery::AltService {
            endpoint: endpoint.clone(),
        };
        self.open(origin, endpoint, discovery).await
    }

    async fn open(
        &self,
        origin: &Origin,
        endpoint: Endpoint,
        discovery: Discovery,
    ) -> Result<Arc<PooledConnection>> {
        let limit = self.config.max_connections_per_origin;
        let live = self
            .connections
            .lock()
            .get(origin)
            .map_or(0, |pooled| pooled.iter().filter(|c| !c.is_closed()).count());
        if live >= limit {
            warn!(origin = %origin, limit, "connection limit reached");
            return Err(AdmissionError::TooManyConnections {
                origin: origin.clone(),
                limit,
            });
        }

        let session = self
            .connector
            .connect(origin, &endpoint, &self.config.h3)
            .await
            .map_err(|source| AdmissionError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        let label = format!(
            "{}({})",
            self.config.label_prefix,
            self.next_label.fetch_add(1, Ordering::Relaxed)
        );
        let conn = Arc::new(PooledConnection::new(
            label,
            origin.clone(),
            endpoint,
            discovery,
            session,
        ));
        if conn.is_closed() {
            return Err(AdmissionError::ConnectionClosed(conn.label().to_string()));
        }
        conn.mark_established();

        info!(
            origin = %origin,
            label = %conn.label(),
            endpoint = %conn.endpoint(),
            discovery = %conn.discovery(),
            "new HTTP/3 connection"
        );
        self.connections
            .lock()
            .entry(origin.clone())
            .or_default()
            .push(Arc::clone(&conn));
        Ok(conn)
    }
}
