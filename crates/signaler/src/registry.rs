//! Connection registry.
//!
//! In-memory table of the transports attached to *this* process, keyed by
//! partition (patient or clinician tier) and identity. It is a delivery
//! mechanism only and is never consulted for matchmaking. All access goes
//! through a single lock, so it is safe to share across connection tasks.

use std::collections::HashMap;

use medirelay_common::{ConnectionId, Partition, Recipient, Role, ServerMessage, SignalError, Tier};
use tokio::sync::{RwLock, mpsc};

/// Sending half of a live transport.
///
/// The socket writer owns the receiving half; once it exits the channel
/// closes and the connection reports itself as not open.
#[derive(Clone, Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
}

impl Connection {
    /// Create a connection with a bounded outbound queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: ConnectionId::generate(),
            tx,
        };
        (conn, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a message without waiting. Fails if the transport is closed or
    /// its queue is full; the message is dropped in both cases.
    pub fn send(&self, message: ServerMessage) -> Result<(), SignalError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(msg) => {
                tracing::warn!(
                    connection_id = %self.id,
                    kind = msg.kind(),
                    "Send queue full, dropping message"
                );
                SignalError::ConnectionClosed(format!("{} send queue full", self.id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                SignalError::ConnectionClosed(self.id.to_string())
            }
        })
    }
}

/// Locally attached connections, partitioned by role/tier
#[derive(Default)]
pub struct ConnectionRegistry {
    partitions: RwLock<HashMap<Partition, HashMap<String, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `identity` locally routable through `conn`.
    ///
    /// Last write wins: any earlier connection for the identity in the same
    /// partition is replaced. A clinician lives in exactly one tier, so a
    /// registration under a new tier also drops the identity from the others.
    pub async fn register(&self, identity: &str, partition: Partition, conn: Connection) {
        let mut partitions = self.partitions.write().await;

        if let Partition::Clinician(tier) = partition {
            for other in Tier::PRIORITY.into_iter().filter(|t| *t != tier) {
                if let Some(map) = partitions.get_mut(&Partition::Clinician(other)) {
                    map.remove(identity);
                }
            }
        }

        let connection_id = conn.id.clone();
        let previous = partitions
            .entry(partition)
            .or_default()
            .insert(identity.to_string(), conn);

        match previous {
            Some(old) if old.id != connection_id => tracing::debug!(
                identity = %identity,
                partition = %partition,
                old_connection = %old.id,
                new_connection = %connection_id,
                "Registration superseded older connection"
            ),
            _ => tracing::debug!(
                identity = %identity,
                partition = %partition,
                connection_id = %connection_id,
                "Connection registered"
            ),
        }
    }

    /// Find the connection for a recipient.
    ///
    /// Without a role, patients are searched first, then clinician tiers in
    /// priority order.
    pub async fn lookup(&self, target: &Recipient) -> Option<Connection> {
        let partitions = self.partitions.read().await;
        search_order(target.role)
            .into_iter()
            .find_map(|p| partitions.get(&p)?.get(&target.identity).cloned())
    }

    /// Find the connection for an identity in one partition
    pub async fn lookup_in(&self, identity: &str, partition: Partition) -> Option<Connection> {
        let partitions = self.partitions.read().await;
        partitions.get(&partition)?.get(identity).cloned()
    }

    /// Remove `identity` from `partition` only if it still maps to
    /// `connection_id`. Returns whether an entry was removed.
    pub async fn remove(
        &self,
        connection_id: &ConnectionId,
        identity: &str,
        partition: Partition,
    ) -> bool {
        let mut partitions = self.partitions.write().await;
        let Some(map) = partitions.get_mut(&partition) else {
            return false;
        };

        match map.get(identity) {
            Some(current) if current.id == *connection_id => {
                map.remove(identity);
                tracing::debug!(
                    identity = %identity,
                    partition = %partition,
                    connection_id = %connection_id,
                    "Connection unregistered"
                );
                true
            }
            Some(current) => {
                tracing::debug!(
                    identity = %identity,
                    closed = %connection_id,
                    current = %current.id,
                    "Stale close ignored, identity re-registered elsewhere"
                );
                false
            }
            None => false,
        }
    }

    /// Number of registered identities per partition
    pub async fn counts(&self) -> HashMap<String, usize> {
        let partitions = self.partitions.read().await;
        partitions
            .iter()
            .map(|(partition, map)| (partition.to_string(), map.len()))
            .collect()
    }

    /// Total registered identities
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.partitions.read().await.values().map(HashMap::len).sum()
    }
}

fn search_order(role: Option<Role>) -> Vec<Partition> {
    let clinicians = Tier::PRIORITY.into_iter().map(Partition::Clinician);
    match role {
        Some(Role::Patient) => vec![Partition::Patient],
        Some(Role::Clinician) => clinicians.collect(),
        None => std::iter::once(Partition::Patient).chain(clinicians).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = Connection::channel(8);
        let (b, _rx_b) = Connection::channel(8);

        registry.register("p1", Partition::Patient, a).await;
        registry.register("p1", Partition::Patient, b.clone()).await;

        let found = registry.lookup(&Recipient::patient("p1")).await.unwrap();
        assert_eq!(found.id(), b.id());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_stale_close_keeps_newer_connection() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = Connection::channel(8);
        let (b, _rx_b) = Connection::channel(8);
        let a_id = a.id().clone();

        registry.register("p1", Partition::Patient, a).await;
        registry.register("p1", Partition::Patient, b.clone()).await;

        assert!(!registry.remove(&a_id, "p1", Partition::Patient).await);
        let found = registry.lookup(&Recipient::patient("p1")).await.unwrap();
        assert_eq!(found.id(), b.id());

        assert!(registry.remove(b.id(), "p1", Partition::Patient).await);
        assert!(registry.lookup(&Recipient::patient("p1")).await.is_none());
    }

    #[tokio::test]
    async fn test_partitions_do_not_collide() {
        let registry = ConnectionRegistry::new();
        let (patient, _rx_p) = Connection::channel(8);
        let (doctor, _rx_d) = Connection::channel(8);

        registry.register("x", Partition::Patient, patient.clone()).await;
        registry.register("x", Partition::Clinician(Tier::Mo), doctor.clone()).await;

        let p = registry.lookup(&Recipient::patient("x")).await.unwrap();
        let d = registry.lookup(&Recipient::clinician("x")).await.unwrap();
        assert_eq!(p.id(), patient.id());
        assert_eq!(d.id(), doctor.id());

        // Unqualified lookups prefer the patient partition
        let any = registry.lookup(&Recipient::new("x", None)).await.unwrap();
        assert_eq!(any.id(), patient.id());
    }

    #[tokio::test]
    async fn test_clinician_tier_change_moves_identity() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = Connection::channel(8);
        let (second, _rx2) = Connection::channel(8);

        registry.register("d1", Partition::Clinician(Tier::Cho), first).await;
        registry.register("d1", Partition::Clinician(Tier::Civil), second.clone()).await;

        assert!(registry.lookup_in("d1", Partition::Clinician(Tier::Cho)).await.is_none());
        let found = registry.lookup(&Recipient::clinician("d1")).await.unwrap();
        assert_eq!(found.id(), second.id());
    }

    #[tokio::test]
    async fn test_send_fails_once_receiver_dropped() {
        let (conn, rx) = Connection::channel(8);
        assert!(conn.is_open());
        drop(rx);
        assert!(!conn.is_open());
        assert!(matches!(
            conn.send(ServerMessage::HeartbeatAck),
            Err(SignalError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_full_queue_drops_message() {
        let (conn, mut rx) = Connection::channel(1);
        assert!(conn.send(ServerMessage::HeartbeatAck).is_ok());
        assert!(conn.send(ServerMessage::NoDoctorAvailable).is_err());
        assert_eq!(rx.recv().await, Some(ServerMessage::HeartbeatAck));
    }

    #[tokio::test]
    async fn test_concurrent_registrations() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        let mut receivers = Vec::new();

        for i in 0..32 {
            let (conn, rx) = Connection::channel(1);
            receivers.push(rx);
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register(&format!("p{i}"), Partition::Patient, conn).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len().await, 32);
        assert_eq!(registry.counts().await.get("patient"), Some(&32));
    }
}
