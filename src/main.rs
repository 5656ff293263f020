//! # Compose Gateway - Main Entry Point
//!
//! Loads the configuration named by `GATEWAY_CONFIG_PATH` (default
//! `config/gateway.yaml`), initializes logging and metrics, then serves until SIGINT
//! or SIGTERM.
//!
//! ## Rust Concepts Used
//!
//! - `#[tokio::main]` turns `main` into an async entry point on the Tokio runtime
//! - `tokio::select!` waits on whichever shutdown signal arrives first

use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};

use compose_gateway::core::error::GatewayError;
use compose_gateway::observability::{init_logging, install_prometheus_exporter};
use compose_gateway::{GatewayConfig, GatewayResult, GatewayServer};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let config_path = std::env::var("GATEWAY_CONFIG_PATH")
        .unwrap_or_else(|_| "config/gateway.yaml".to_string());

    let config = match GatewayConfig::load_from_file(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);

    info!("🚀 Starting Compose Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration loaded from {}", config_path);

    if let Some(port) = config.server.metrics_port {
        let addr: SocketAddr = format!("{}:{}", config.server.bind_address, port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid metrics address: {}", e)))?;
        match install_prometheus_exporter(addr) {
            Ok(()) => info!("📈 Prometheus metrics available on {}/metrics", addr),
            Err(e) => warn!("⚠️  Metrics exporter not started: {}", e),
        }
    }

    let server = GatewayServer::new(config)?;
    info!(
        "🛣️  {} service(s) registered",
        server.state().registry().len()
    );

    if let Err(e) = server.start(shutdown_signal()).await {
        error!("🚨 Gateway stopped with error: {}", e);
        return Err(e);
    }

    info!("✅ Compose Gateway shutdown complete");
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}
