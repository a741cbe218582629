//! Configuration module for the livestate service.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the intake server (default: 5000)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "livestate.db")
    pub db_path: String,
    /// Per-sink transmission budget (default: 1000 ms)
    pub sink_timeout: Duration,
    /// Sinks transmitted to in parallel (default: 8)
    pub sink_concurrency: usize,
    /// Inventory JSON applied at start-up (default: none)
    pub import_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 5000,
            db_path: "livestate.db".to_string(),
            sink_timeout: Duration::from_millis(1000),
            sink_concurrency: 8,
            import_path: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LIVESTATE_HTTP_PORT`: HTTP port (default: 5000)
    /// - `LIVESTATE_DB_PATH`: Database file path (default: "livestate.db")
    /// - `LIVESTATE_SINK_TIMEOUT_MS`: Per-sink timeout in milliseconds (default: 1000)
    /// - `LIVESTATE_SINK_CONCURRENCY`: Parallel sink transmissions (default: 8)
    /// - `LIVESTATE_IMPORT_PATH`: Inventory file to import (default: unset)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "LIVESTATE_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("LIVESTATE_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "LIVESTATE_SINK_TIMEOUT_MS").filter(|ms| *ms > 0) {
            cfg.sink_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<usize, _>(&lookup, "LIVESTATE_SINK_CONCURRENCY").filter(|n| *n > 0) {
            cfg.sink_concurrency = n;
        }

        cfg.import_path = lookup("LIVESTATE_IMPORT_PATH").filter(|p| !p.is_empty());

        cfg
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
