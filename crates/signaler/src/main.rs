//! # Signaler - MediRelay signaling relay
//!
//! Brokers WebRTC session setup between patients and clinicians. Any number
//! of signaler nodes run side by side; clinician presence and cross-node
//! delivery go through shared Redis.
//!
//! ## Architecture
//! ```text
//! Patient ─┐                         ┌─ Clinician
//!          ws                        ws
//!          ↓                          ↓
//!     Signaler A ⇄ Redis pub/sub ⇄ Signaler B
//!          ↓                          ↓
//!          └──── Redis (presence) ────┘
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod bus;
mod config;
mod handover;
mod matchmaking;
mod presence;
mod registry;
mod relay;
mod routes;
mod session;
mod state;
mod ws;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

use config::{AppConfig, Backend};
use state::AppState;

/// MediRelay Signaler - presence-aware signaling relay
#[derive(Parser, Debug)]
#[command(name = "signaler")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/signaler.toml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Shared state backend (overrides config)
    #[arg(long, value_enum, env = "SIGNALER_BACKEND")]
    backend: Option<Backend>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("🩺 Starting MediRelay Signaler v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config, &args)?;
    info!(node_id = %config.node_id, backend = ?config.backend, "📋 Configuration loaded from {}", args.config);

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let state = AppState::new(config.clone()).await?;
    if config.backend == Backend::Redis {
        info!("✅ Redis connected: {}", config.redis_url);
    }

    // Spawn bus consumer
    let consumer = tokio::spawn(relay::run_bus_consumer(
        state.router.clone(),
        shutdown_tx.subscribe(),
    ));

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("🚀 Signaler listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    let _ = consumer.await;
    info!("👋 Signaler shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .context("Failed to initialise logging")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .context("Failed to initialise logging")?;
    }

    Ok(())
}
