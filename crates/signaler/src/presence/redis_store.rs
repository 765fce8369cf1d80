//! Redis-backed presence directory.
//!
//! One JSON string per clinician at `presence:{TIER}:{identity}`, written
//! with `SET EX` so Redis reaps records that stop receiving heartbeats.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use medirelay_common::constants::redis_keys::PRESENCE_PREFIX;
use medirelay_common::{PresenceRecord, SignalError, Tier};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::PresenceDirectory;

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 100;

/// Presence directory over a shared Redis
#[derive(Clone)]
pub struct RedisDirectory {
    redis: ConnectionManager,
}

impl RedisDirectory {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(tier: Tier, identity: &str) -> String {
        format!("{PRESENCE_PREFIX}{tier}:{identity}")
    }

    async fn write(&self, record: &PresenceRecord, ttl: Duration) -> Result<(), SignalError> {
        let key = Self::key(record.tier, &record.identity);
        let data = serde_json::to_string(record)?;
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(&key, &data, ttl.as_secs().max(1))
            .await
            .map_err(store_err)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, SignalError> {
        let mut conn = self.redis.clone();
        // SCAN may return a key more than once; keep first-seen order
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;

            merge_batch(&mut keys, &mut seen, batch);

            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

fn merge_batch(keys: &mut Vec<String>, seen: &mut HashSet<String>, batch: Vec<String>) {
    for key in batch {
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
}

fn store_err(err: redis::RedisError) -> SignalError {
    SignalError::Store(err.to_string())
}

fn decode(key: &str, data: &str) -> Option<PresenceRecord> {
    match serde_json::from_str(data) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Skipping undecodable presence record");
            None
        }
    }
}

#[async_trait]
impl PresenceDirectory for RedisDirectory {
    async fn put(&self, record: &PresenceRecord, ttl: Duration) -> Result<(), SignalError> {
        let mut record = record.clone();
        record.refresh(ttl);
        self.write(&record, ttl).await?;

        tracing::debug!(
            identity = %record.identity,
            tier = %record.tier,
            connection_id = %record.connection_id,
            "Presence record stored"
        );
        Ok(())
    }

    async fn refresh(&self, tier: Tier, identity: &str, ttl: Duration) -> Result<bool, SignalError> {
        let Some(mut record) = self.get(tier, identity).await? else {
            return Ok(false);
        };
        if !record.is_live() {
            return Ok(false);
        }

        record.refresh(ttl);
        self.write(&record, ttl).await?;
        Ok(true)
    }

    async fn get(&self, tier: Tier, identity: &str) -> Result<Option<PresenceRecord>, SignalError> {
        let key = Self::key(tier, identity);
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(&key).await.map_err(store_err)?;
        Ok(data.and_then(|d| decode(&key, &d)))
    }

    async fn get_all(&self, tier: Tier) -> Result<Vec<PresenceRecord>, SignalError> {
        let pattern = format!("{PRESENCE_PREFIX}{tier}:*");
        let keys = self.scan_keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let values: Vec<Option<String>> = conn.mget(&keys).await.map_err(store_err)?;

        // Keys reaped between SCAN and MGET come back as nil
        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| decode(key, &value?))
            .collect())
    }

    async fn delete(&self, tier: Tier, identity: &str) -> Result<(), SignalError> {
        let key = Self::key(tier, identity);
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(&key).await.map_err(store_err)?;

        tracing::debug!(identity = %identity, tier = %tier, "Presence record deleted");
        Ok(())
    }

    async fn ping(&self) -> Result<(), SignalError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(RedisDirectory::key(Tier::Mo, "m1"), "presence:MO:m1");
        assert_eq!(RedisDirectory::key(Tier::Civil, "c1"), "presence:CIVIL:c1");
    }

    #[test]
    fn test_scan_batches_merge_in_first_seen_order() {
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let batch = |ids: &[&str]| ids.iter().map(|id| format!("presence:MO:{id}")).collect();

        merge_batch(&mut keys, &mut seen, batch(&["b", "a"]));
        merge_batch(&mut keys, &mut seen, batch(&["a", "c", "b"]));

        assert_eq!(keys, vec!["presence:MO:b", "presence:MO:a", "presence:MO:c"]);
    }

    #[test]
    fn test_decode_skips_garbage() {
        assert!(decode("presence:MO:x", "{not json").is_none());

        let record = PresenceRecord::online("m1", "c1".into(), Tier::Mo, Duration::from_secs(30));
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(decode("presence:MO:m1", &json), Some(record));
    }
}
