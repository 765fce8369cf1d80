//! Shared presence directory.
//!
//! Maps clinician identity to a TTL-bound [`PresenceRecord`]. Backends may
//! hand back records past their deadline; callers filter with
//! [`PresenceRecord::is_live`] before trusting one.

use std::time::Duration;

use async_trait::async_trait;
use medirelay_common::{PresenceRecord, SignalError, Tier};

mod memory;
mod redis_store;

pub use self::memory::MemoryDirectory;
pub use self::redis_store::RedisDirectory;

/// Presence store contract. Records are addressed by (tier, identity).
#[async_trait]
pub trait PresenceDirectory: Send + Sync {
    /// Create or overwrite a record, expiring after `ttl`
    async fn put(&self, record: &PresenceRecord, ttl: Duration) -> Result<(), SignalError>;

    /// Bump heartbeat and deadline. `Ok(false)` if the record is gone.
    async fn refresh(&self, tier: Tier, identity: &str, ttl: Duration) -> Result<bool, SignalError>;

    async fn get(&self, tier: Tier, identity: &str) -> Result<Option<PresenceRecord>, SignalError>;

    /// All records in a tier, in the store's iteration order
    async fn get_all(&self, tier: Tier) -> Result<Vec<PresenceRecord>, SignalError>;

    /// Idempotent removal
    async fn delete(&self, tier: Tier, identity: &str) -> Result<(), SignalError>;

    /// Connectivity probe for readiness checks
    async fn ping(&self) -> Result<(), SignalError> {
        Ok(())
    }
}
