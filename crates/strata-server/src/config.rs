//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::hub::HubConfig;

/// Configuration for the realtime service
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// SQLite database path; platform default when absent
    pub db_path: Option<PathBuf>,
    /// Shared secret for connection tokens
    pub auth_secret: String,
    /// Heartbeat supervisor scan period, seconds
    pub heartbeat_interval_secs: u64,
    /// Silence threshold before force-disconnect, seconds
    pub heartbeat_timeout_secs: u64,
    /// Per-user offline message buffer size
    pub offline_queue_capacity: usize,
    /// Per-connection outbound mailbox size
    pub outbound_mailbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 8787).into(),
            db_path: None,
            auth_secret: "dev-secret".to_string(),
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            offline_queue_capacity: 100,
            outbound_mailbox_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `STRATA_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("STRATA_BIND_ADDR") {
            if let Ok(addr) = addr.parse() {
                config.bind_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("STRATA_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(secret) = std::env::var("STRATA_AUTH_SECRET") {
            if !secret.is_empty() {
                config.auth_secret = secret;
            }
        }
        if let Ok(v) = std::env::var("STRATA_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(v) = v.parse() {
                config.heartbeat_interval_secs = v;
            }
        }
        if let Ok(v) = std::env::var("STRATA_HEARTBEAT_TIMEOUT_SECS") {
            if let Ok(v) = v.parse() {
                config.heartbeat_timeout_secs = v;
            }
        }
        config
    }

    /// Derive the hub configuration
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            heartbeat_interval: std::time::Duration::from_secs(self.heartbeat_interval_secs),
            heartbeat_timeout: std::time::Duration::from_secs(self.heartbeat_timeout_secs),
            offline_queue_capacity: self.offline_queue_capacity,
            outbound_mailbox_capacity: self.outbound_mailbox_capacity,
        }
    }
}
