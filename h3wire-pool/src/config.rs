//! Pool configuration.
//!
//! Loaded from TOML; every field has a default so a partial file works:
//!
//! ```toml
//! stream_limit_timeout_ms = 500
//! max_connections_per_origin = 4
//!
//! [h3]
//! max_push_id = 16
//! enable_server_push = true
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use h3wire::H3Config;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How long a request waits for a stream-limited connection to grant
    /// more streams before failing over. 0 fails over immediately.
    pub stream_limit_timeout_ms: u64,

    /// Cap on live connections per origin, counting failover connections.
    pub max_connections_per_origin: usize,

    /// Lifetime of an Alt-Svc entry without an explicit `ma`.
    pub alt_svc_default_max_age_secs: u64,

    /// When set, requests go through this proxy and cannot use HTTP/3.
    pub forward_proxy: Option<String>,

    /// Connection labels are `<prefix>(<n>)`.
    pub label_prefix: String,

    /// HTTP/3 settings handed to the connector.
    pub h3: H3Config,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            stream_limit_timeout_ms: 1000,
            max_connections_per_origin: 8,
            alt_svc_default_max_age_secs: 86400,
            forward_proxy: None,
            label_prefix: "h3".to_string(),
            h3: H3Config::default(),
        }
    }
}

impl PoolConfig {
    pub fn stream_limit_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_limit_timeout_ms)
    }

    pub fn alt_svc_default_max_age(&self) -> Duration {
        Duration::from_secs(self.alt_svc_default_max_age_secs)
    }

    pub fn from_toml_str(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_connections_per_origin == 0 {
            errors.push("max_connections_per_origin must be at least 1".to_string());
        }
        if self.label_prefix.is_empty() {
            errors.push("label_prefix cannot be empty".to_string());
        }
        if matches!(&self.forward_proxy, Some(proxy) if proxy.trim().is_empty()) {
            errors.push("forward_proxy cannot be empty when set".to_string());
        }
        if let Err(e) = self.h3.validate() {
            errors.push(format!("h3: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load and validate a pool configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<PoolConfig> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = PoolConfig::from_toml_str(&config_str)
        .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

    config.validate().map_err(|errors| {
        anyhow::anyhow!("Configuration validation failed:\n{}", errors.join("\n"))
    })?;

    tracing::debug!(config_path = %path.display(), "pool configuration loaded");
    Ok(config)
}
