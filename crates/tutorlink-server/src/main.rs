//! # tutorlink-server
//!
//! Messaging and presence server for the Tutorlink platform.
//!
//! This binary provides:
//! - **Message ingress**: validated, deduplicated persistence of direct and
//!   group messages
//! - **Delivery bus**: in-process fan-out of events to live WebSocket
//!   connections, one channel per user and per group
//! - **Read-state tracking**: per-conversation acknowledgments and unread
//!   counters
//! - **REST API** (axum) for message submission, history, read receipts and
//!   group management

mod api;
mod auth;
mod bus;
mod config;
mod error;
mod gateway;
mod ingress;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tutorlink_store::Database;

use crate::api::AppState;
use crate::bus::DeliveryBus;
use crate::config::ServerConfig;
use crate::ingress::MessageIngress;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tutorlink_server=debug")),
        )
        .init();

    info!("Starting Tutorlink server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        addr = %config.http_addr,
        dedup_window_secs = config.dedup_window_secs,
        "Loaded configuration"
    );

    let database = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = database.path() {
        info!(path = %path.display(), "Database opened");
    }
    let db = Arc::new(StdMutex::new(database));

    let bus = DeliveryBus::new();
    let ingress = Arc::new(MessageIngress::new(
        db.clone(),
        bus.clone(),
        Duration::from_secs(config.dedup_window_secs),
    ));

    // Periodic dedup-window eviction.
    let purger = ingress.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            purger.purge_stale().await;
        }
    });

    let http_addr = config.http_addr;
    let state = AppState::new(db, bus, ingress, Arc::new(config));

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
