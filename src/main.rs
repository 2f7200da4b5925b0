//! relayq server
//!
//! Loads settings, opens the sled ledger, starts the sweeper and serves the
//! WebSocket protocol until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use relayq::broker::{DeliveryEngine, QueueManager};
use relayq::client::ServiceRegistry;
use relayq::config::{load_config, load_config_from};
use relayq::persistence::SledStore;
use relayq::transport::websocket::start_websocket_server;
use relayq::utils::{Result, logging};

#[derive(Parser)]
#[command(name = "relayq", about = "Durable multi-consumer message broker")]
struct Cli {
    /// Settings file; defaults to `config/default.*` when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `log.level` from settings
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    if let Err(e) = run_server(cli).await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };
    logging::init(cli.log_level.as_deref().unwrap_or(&settings.log.level));

    let store = SledStore::open(&settings.storage.path)?;
    info!(path = %settings.storage.path, "ledger opened");

    let registry = ServiceRegistry::new(Duration::from_millis(settings.server.ack_timeout_ms));
    let engine = DeliveryEngine::new(
        Arc::new(store.clone()),
        Arc::new(registry.clone()),
        settings.queue.clone(),
    )?;
    let manager = QueueManager::start(engine.clone());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;

    tokio::select! {
        _ = start_websocket_server(listener, engine, registry) => {
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    manager.shutdown().await;
    store.flush().await?;
    Ok(())
}
