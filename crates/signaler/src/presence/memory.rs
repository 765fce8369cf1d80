//! In-process presence directory for single-node mode and tests.
//!
//! Expired entries are kept until overwritten or deleted, like a store
//! that has not reaped them yet.

use std::time::Duration;

use async_trait::async_trait;
use medirelay_common::{PresenceRecord, SignalError, Tier};
use tokio::sync::RwLock;

use super::PresenceDirectory;

/// Insertion-ordered presence records
#[derive(Default)]
pub struct MemoryDirectory {
    records: RwLock<Vec<PresenceRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record verbatim, deadline included
    pub async fn insert(&self, record: PresenceRecord) {
        let mut records = self.records.write().await;
        match records
            .iter_mut()
            .find(|r| r.tier == record.tier && r.identity == record.identity)
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl PresenceDirectory for MemoryDirectory {
    async fn put(&self, record: &PresenceRecord, ttl: Duration) -> Result<(), SignalError> {
        let mut record = record.clone();
        record.refresh(ttl);
        self.insert(record).await;
        Ok(())
    }

    async fn refresh(&self, tier: Tier, identity: &str, ttl: Duration) -> Result<bool, SignalError> {
        let mut records = self.records.write().await;
        match records
            .iter_mut()
            .find(|r| r.tier == tier && r.identity == identity && r.is_live())
        {
            Some(record) => {
                record.refresh(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, tier: Tier, identity: &str) -> Result<Option<PresenceRecord>, SignalError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| r.tier == tier && r.identity == identity)
            .cloned())
    }

    async fn get_all(&self, tier: Tier) -> Result<Vec<PresenceRecord>, SignalError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| r.tier == tier).cloned().collect())
    }

    async fn delete(&self, tier: Tier, identity: &str) -> Result<(), SignalError> {
        self.records
            .write()
            .await
            .retain(|r| !(r.tier == tier && r.identity == identity));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = MemoryDirectory::new();
        let record = PresenceRecord::online("m1", "c1".into(), Tier::Mo, TTL);
        dir.put(&record, TTL).await.unwrap();

        let found = dir.get(Tier::Mo, "m1").await.unwrap().unwrap();
        assert_eq!(found.connection_id, record.connection_id);
        assert!(dir.get(Tier::Cho, "m1").await.unwrap().is_none());

        dir.delete(Tier::Mo, "m1").await.unwrap();
        dir.delete(Tier::Mo, "m1").await.unwrap();
        assert_eq!(dir.len().await, 0);
    }

    #[tokio::test]
    async fn test_refresh_requires_live_record() {
        let dir = MemoryDirectory::new();
        assert!(!dir.refresh(Tier::Mo, "m1", TTL).await.unwrap());

        let mut expired = PresenceRecord::online("m1", "c1".into(), Tier::Mo, TTL);
        expired.expires_at = expired.last_seen - 1;
        dir.insert(expired).await;
        assert!(!dir.refresh(Tier::Mo, "m1", TTL).await.unwrap());

        dir.put(&PresenceRecord::online("m1", "c1".into(), Tier::Mo, TTL), TTL)
            .await
            .unwrap();
        assert!(dir.refresh(Tier::Mo, "m1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_all_keeps_insertion_order() {
        let dir = MemoryDirectory::new();
        for id in ["a", "b", "c"] {
            dir.put(&PresenceRecord::online(id, id.into(), Tier::Civil, TTL), TTL)
                .await
                .unwrap();
        }
        dir.put(&PresenceRecord::online("z", "z".into(), Tier::Cho, TTL), TTL)
            .await
            .unwrap();

        let ids: Vec<_> = dir
            .get_all(Tier::Civil)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
