//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Instant;

use crate::bus::{Bus, MemoryBus, RedisBus};
use crate::config::{AppConfig, Backend};
use crate::handover::HandoverOrchestrator;
use crate::matchmaking::Matchmaker;
use crate::presence::{MemoryDirectory, PresenceDirectory, RedisDirectory};
use crate::registry::ConnectionRegistry;
use crate::relay::RelayRouter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Node identifier for clustering
    pub node_id: String,

    /// Connections attached to this process
    pub registry: Arc<ConnectionRegistry>,

    /// Shared clinician presence
    pub directory: Arc<dyn PresenceDirectory>,

    /// Cross-instance bus
    pub bus: Arc<dyn Bus>,

    /// Clinician selection
    pub matchmaker: Arc<Matchmaker>,

    /// Local-or-bus delivery
    pub router: Arc<RelayRouter>,

    /// Clinician handover
    pub handover: Arc<HandoverOrchestrator>,

    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Create new application state, connecting to Redis when configured
    pub async fn new(config: AppConfig) -> Result<Self> {
        match config.backend {
            Backend::Redis => {
                let client = redis::Client::open(config.redis_url.as_str())
                    .context("Failed to create Redis client")?;

                // Connection manager handles reconnection
                let redis = ConnectionManager::new(client.clone())
                    .await
                    .context("Failed to connect to Redis")?;

                let directory = Arc::new(RedisDirectory::new(redis.clone()));
                let bus = Arc::new(RedisBus::new(client, redis, config.bus.channel_prefix.clone()));
                Ok(Self::with_backends(config, directory, bus))
            }
            Backend::Memory => {
                tracing::warn!("Using in-memory backends, cross-node relay disabled");
                Ok(Self::with_backends(
                    config,
                    Arc::new(MemoryDirectory::new()),
                    Arc::new(MemoryBus::new()),
                ))
            }
        }
    }

    /// Assemble state around existing presence and bus backends
    pub fn with_backends(
        config: AppConfig,
        directory: Arc<dyn PresenceDirectory>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        let node_id = config.node_id.clone();
        let registry = Arc::new(ConnectionRegistry::new());
        let matchmaker = Arc::new(Matchmaker::new(directory.clone()));
        let router = Arc::new(RelayRouter::new(
            node_id.clone(),
            registry.clone(),
            bus.clone(),
            config.relay.dedup_window(),
        ));
        let handover = Arc::new(HandoverOrchestrator::new(matchmaker.clone(), router.clone()));

        Self {
            config,
            node_id,
            registry,
            directory,
            bus,
            matchmaker,
            router,
            handover,
            started_at: Instant::now(),
        }
    }
}
