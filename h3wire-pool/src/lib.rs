//! HTTP/3 connection admission for clients.
//!
//! Decides which QUIC connection a request runs on: direct connections to
//! the URI's authority, connections to alternative services advertised via
//! `Alt-Svc`, reuse across concurrent requests, and failover when a
//! connection runs out of bidirectional stream credit.

pub mod alt_svc;
pub mod budget;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod origin;
pub mod pool;

pub use alt_svc::{AltService, AltSvcRegistry, AltSvcValue};
pub use budget::{StreamBudget, StreamPermit};
pub use config::{load_config, PoolConfig};
pub use connection::{
    AltSvcDiscoverer, ConnectionState, Connector, PooledConnection, QuicSession, StreamLease,
};
pub use discovery::{Discovery, DiscoveryMode};
pub use error::{AdmissionError, Result};
pub use origin::{Endpoint, Origin};
pub use pool::{ConnectionPool, Selection};
