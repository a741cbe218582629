//! livestate - overall-state and perfdata service for a monitoring backend.
//!
//! Computes a 0-4 overall state for hosts and services and forwards
//! check-result perfdata to time-series sinks.

mod config;
mod db;
mod delivery;
mod events;
mod import;
mod perfdata;
mod realm;
mod sink;
mod state;
mod web;

use config::ServerConfig;
use db::Store;
use delivery::DeliveryEngine;
use events::Dispatcher;
use sink::{CarbonTransport, HttpTransport, Transports};
use state::OverallStateEngine;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("livestate=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting livestate on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    import::ensure_root_realm(&store)?;
    if let Some(path) = &cfg.import_path {
        tracing::info!("Importing inventory from {}", path);
        let inventory = import::load(path)?;
        import::apply(&store, &inventory)?;
    }

    // Wire the engines
    let transports = Transports::new(
        Arc::new(CarbonTransport::new()),
        Arc::new(HttpTransport::new(cfg.sink_timeout)?),
    );
    let delivery = DeliveryEngine::new(
        store.clone(),
        transports,
        cfg.sink_timeout,
        cfg.sink_concurrency,
    );
    let dispatcher = Dispatcher::new(OverallStateEngine::new(store.clone()), delivery);

    // Start web server
    let server = Server::new(cfg, store, dispatcher);
    server.start().await?;

    Ok(())
}
