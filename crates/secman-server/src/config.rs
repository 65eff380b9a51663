//! Server configuration for `secman`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `SECMAN_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Number of unseal shares produced at init.
    pub seal_shares: u8,
    /// Shares required to unseal.
    pub seal_threshold: u8,
    /// Requests running longer than this are dropped.
    pub request_timeout: Duration,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: String },
}

const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 8080);

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SECMAN_BIND_ADDR`: bind address (default: `127.0.0.1:8080`)
    /// - `SECMAN_STORAGE`: `memory` or `rocksdb` (default: `memory`)
    /// - `SECMAN_STORAGE_PATH`: path for `rocksdb` (default: `./data`)
    /// - `SECMAN_LOG_LEVEL`: log filter (default: `info`)
    /// - `SECMAN_SEAL_SHARES`: unseal shares at init (default: `5`)
    /// - `SECMAN_SEAL_THRESHOLD`: shares needed to unseal (default: `3`)
    /// - `SECMAN_REQUEST_TIMEOUT_SECS`: per-request timeout (default: `30`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = var("SECMAN_BIND_ADDR")
            .and_then(|addr| addr.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(DEFAULT_BIND_ADDR));

        let storage_path = var("SECMAN_STORAGE_PATH").unwrap_or_else(|| "./data".to_owned());

        let storage_backend = match var("SECMAN_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "rocksdb" => StorageBackendType::RocksDb { path: storage_path },
            _ => StorageBackendType::Memory,
        };

        let log_level = var("SECMAN_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let seal_shares = var("SECMAN_SEAL_SHARES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let seal_threshold = var("SECMAN_SEAL_THRESHOLD")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let request_timeout = var("SECMAN_REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(30), Duration::from_secs);

        Self {
            bind_addr,
            storage_backend,
            log_level,
            seal_shares,
            seal_threshold,
            request_timeout,
        }
    }
}
