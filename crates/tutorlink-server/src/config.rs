//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use tutorlink_shared::constants::{APP_NAME, DEDUP_WINDOW_SECS, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API / gateway server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database. When unset, the store picks
    /// the platform data directory.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Retention window for submit deduplication, in seconds.
    /// Env: `DEDUP_WINDOW_SECS`
    /// Default: `120`
    pub dedup_window_secs: u64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Tutorlink Node"`
    pub instance_name: String,

    /// Allowed CORS origin for browser clients. When unset, any origin is
    /// accepted (local development).
    /// Env: `CORS_ORIGIN`
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            db_path: None,
            dedup_window_secs: DEDUP_WINDOW_SECS,
            instance_name: format!("{APP_NAME} Node"),
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(val) = std::env::var("DEDUP_WINDOW_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.dedup_window_secs = secs;
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(origin) = std::env::var("CORS_ORIGIN") {
            config.cors_origin = Some(origin);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
