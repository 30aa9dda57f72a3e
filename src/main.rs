//! OCPP charge point: keeps a WebSocket session to the central system and
//! delivers outbound calls through the message queue.

mod connection;
mod transport;

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use ocpp_core::config::AppConfig;
use ocpp_core::error::AppError;
use ocpp_queue::{MessageQueue, open_store};

use crate::connection::ChargePoint;
use crate::transport::WebSocketTransport;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Charge point error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("OCPP_CONFIG_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!(
        "Starting charge point '{}' v{}",
        config.central_system.charge_point_id,
        env!("CARGO_PKG_VERSION")
    );

    let store = open_store(&config.queue)?;
    let transport = Arc::new(WebSocketTransport::new());
    let queue = Arc::new(
        MessageQueue::builder(transport.clone(), config.queue.clone())
            .with_store(store)
            .start(),
    );
    queue.restore_transaction_messages(&[])?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let charge_point = ChargePoint::new(&config, queue.clone(), transport);
    let session = tokio::spawn(charge_point.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for Ctrl-C: {e}")))?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    queue.stop().await;
    if let Err(e) = session.await {
        tracing::error!("Connection task failed: {}", e);
    }

    tracing::info!("Charge point stopped");
    Ok(())
}
