//! Configuration management for the signaler.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use medirelay_common::constants::{
    DEDUP_WINDOW_SECS, DEFAULT_LISTEN_ADDR, DEFAULT_REDIS_URL, PRESENCE_TTL_SECS,
    SEND_QUEUE_CAPACITY, redis_keys::BUS_CHANNEL_PREFIX,
};

/// Where presence and the cross-instance bus live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shared Redis (multi-node)
    Redis,
    /// In-process only (single node, development)
    Memory,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP + WebSocket listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// This node's unique ID (auto-generated if not set)
    #[serde(default = "generate_node_id")]
    pub node_id: String,

    /// Shared state backend
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Presence configuration
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Relay configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Bus configuration
    #[serde(default)]
    pub bus: BusConfig,
}

/// Presence-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Record lifetime without a heartbeat
    #[serde(default = "default_presence_ttl")]
    pub ttl_secs: u64,
}

impl PresenceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_presence_ttl(),
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Outbound queue depth per connection
    #[serde(default = "default_send_queue")]
    pub send_queue_capacity: usize,

    /// How long delivered envelope ids are remembered
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
}

impl RelayConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: default_send_queue(),
            dedup_window_secs: default_dedup_window(),
        }
    }
}

/// Cross-instance bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Pub/sub channel prefix
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_backend() -> Backend { Backend::Redis }
fn default_presence_ttl() -> u64 { PRESENCE_TTL_SECS }
fn default_send_queue() -> usize { SEND_QUEUE_CAPACITY }
fn default_dedup_window() -> u64 { DEDUP_WINDOW_SECS }
fn default_channel_prefix() -> String { BUS_CHANNEL_PREFIX.to_string() }

fn generate_node_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("node-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        if !Path::new(config_path).exists() {
            tracing::warn!(path = config_path, "Config file not found, using defaults");
        }

        // Missing file falls back to defaults; SIGNALER__* always applies
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("SIGNALER").separator("__"))
            .build()
            .context("Failed to load config file")?;

        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to parse config")?;

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(backend) = args.backend {
            config.backend = backend;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.presence.ttl_secs == 0 {
            bail!("presence.ttl_secs must be at least 1");
        }
        if self.relay.send_queue_capacity == 0 {
            bail!("relay.send_queue_capacity must be at least 1");
        }
        if self.relay.dedup_window_secs == 0 {
            bail!("relay.dedup_window_secs must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            node_id: generate_node_id(),
            backend: default_backend(),
            presence: PresenceConfig::default(),
            relay: RelayConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:5001");
        assert_eq!(config.presence.ttl(), Duration::from_secs(30));
        assert_eq!(config.backend, Backend::Redis);
        assert!(config.node_id.starts_with("node-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                "backend = \"memory\"\n[presence]\nttl_secs = 10\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: AppConfig = settings.try_deserialize().unwrap();

        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.presence.ttl_secs, 10);
        assert_eq!(config.relay.send_queue_capacity, SEND_QUEUE_CAPACITY);
        assert_eq!(config.bus.channel_prefix, "medirelay:");
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = AppConfig::default();
        config.presence.ttl_secs = 0;
        assert!(config.validate().is_err());
    }
}
