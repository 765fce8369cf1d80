//! Relay router.
//!
//! Delivers a message to an identity: directly when the target is attached
//! to this process, otherwise by publishing an envelope to the bus, where
//! whichever node holds the target picks it up. Local delivery is a
//! non-blocking queue push; remote delivery is fire-and-forget. Nothing is
//! retried and nothing waits for an acknowledgment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use medirelay_common::{Envelope, Recipient, ServerMessage, Topic};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::bus::Bus;
use crate::registry::ConnectionRegistry;

mod dedup;

pub use dedup::{Freshness, SeenEnvelopes};

/// Delay before resubscribing after the bus streams end
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// What happened to a relayed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on a connection owned by this process
    Local,
    /// Handed to the bus for other nodes
    Published,
    /// Neither; the message is gone
    Dropped,
}

#[derive(Default)]
struct Counters {
    local: AtomicU64,
    published: AtomicU64,
    remote_delivered: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
}

/// Relay counters for the metrics endpoint
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RelayStats {
    pub local: u64,
    pub published: u64,
    pub remote_delivered: u64,
    pub duplicates: u64,
    pub dropped: u64,
}

pub struct RelayRouter {
    node_id: String,
    registry: Arc<ConnectionRegistry>,
    bus: Arc<dyn Bus>,
    seen: Mutex<SeenEnvelopes>,
    counters: Counters,
}

impl RelayRouter {
    pub fn new(
        node_id: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        bus: Arc<dyn Bus>,
        dedup_window: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            registry,
            bus,
            seen: Mutex::new(SeenEnvelopes::new(dedup_window)),
            counters: Counters::default(),
        }
    }

    /// Deliver `message` to `target`, locally if possible, else via the bus.
    ///
    /// A registered but closed transport counts as not found, since a newer
    /// connection may exist on another node. A full local queue drops the
    /// message.
    pub async fn relay(
        &self,
        target: &Recipient,
        message: ServerMessage,
        origin: Option<&str>,
    ) -> Delivery {
        if let Some(conn) = self.registry.lookup(target).await {
            if conn.is_open() {
                let kind = message.kind();
                match conn.send(message.clone()) {
                    Ok(()) => {
                        self.counters.local.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            target = %target,
                            kind,
                            connection_id = %conn.id(),
                            "Relayed locally"
                        );
                        return Delivery::Local;
                    }
                    Err(e) if conn.is_open() => {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(target = %target, kind, error = %e, "Local delivery failed");
                        return Delivery::Dropped;
                    }
                    Err(_) => {}
                }
            }
        }

        self.publish(target, message, origin).await
    }

    async fn publish(&self, target: &Recipient, message: ServerMessage, origin: Option<&str>) -> Delivery {
        let envelope = Envelope::new(
            target.clone(),
            message,
            origin.map(str::to_string),
            self.node_id.clone(),
        );
        let topic = envelope.topic();

        match self.bus.publish(topic, &envelope).await {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target = %target,
                    kind = envelope.message.kind(),
                    topic = %topic,
                    envelope_id = %envelope.id,
                    "Target not local, published to bus"
                );
                Delivery::Published
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target = %target,
                    topic = %topic,
                    error = %e,
                    "Bus publish failed, message dropped"
                );
                Delivery::Dropped
            }
        }
    }

    /// Handle one envelope from the bus.
    ///
    /// Delivered only if the target is attached here right now and the
    /// envelope is neither stale nor already delivered. Returns whether it
    /// was delivered.
    pub async fn deliver_envelope(&self, envelope: &Envelope) -> bool {
        match self.check_seen(envelope) {
            Freshness::Fresh => {}
            Freshness::Duplicate => {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(envelope_id = %envelope.id, "Duplicate envelope ignored");
                return false;
            }
            Freshness::Stale => {
                tracing::debug!(envelope_id = %envelope.id, sent_at = envelope.sent_at, "Stale envelope ignored");
                return false;
            }
        }

        let Some(conn) = self.registry.lookup(&envelope.target).await else {
            tracing::trace!(target = %envelope.target, "Envelope target not attached here");
            return false;
        };
        if !conn.is_open() {
            return false;
        }

        match conn.send(envelope.message.clone()) {
            Ok(()) => {
                self.mark_seen(envelope);
                self.counters.remote_delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target = %envelope.target,
                    kind = envelope.message.kind(),
                    origin_node = %envelope.origin_node,
                    "Delivered envelope from bus"
                );
                true
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target = %envelope.target, error = %e, "Envelope delivery failed");
                false
            }
        }
    }

    fn check_seen(&self, envelope: &Envelope) -> Freshness {
        match self.seen.lock() {
            Ok(mut seen) => seen.check(&envelope.id, envelope.sent_at),
            Err(poisoned) => poisoned.into_inner().check(&envelope.id, envelope.sent_at),
        }
    }

    fn mark_seen(&self, envelope: &Envelope) {
        match self.seen.lock() {
            Ok(mut seen) => seen.record(&envelope.id, envelope.sent_at),
            Err(poisoned) => poisoned.into_inner().record(&envelope.id, envelope.sent_at),
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            local: self.counters.local.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            remote_delivered: self.counters.remote_delivered.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Consume every bus topic and hand envelopes to the router until shutdown.
///
/// If the subscriptions end (e.g. the bus connection dropped) they are
/// re-established after a short delay.
pub async fn run_bus_consumer(router: Arc<RelayRouter>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let mut streams = Vec::with_capacity(Topic::ALL.len());
        for topic in Topic::ALL {
            match router.bus.subscribe(topic).await {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Bus subscribe failed");
                    break;
                }
            }
        }

        if streams.len() == Topic::ALL.len() {
            tracing::info!(node_id = %router.node_id, "📡 Bus consumer started");
            let mut merged = futures::stream::select_all(streams);

            loop {
                tokio::select! {
                    next = merged.next() => match next {
                        Some(envelope) => {
                            router.deliver_envelope(&envelope).await;
                        }
                        None => {
                            tracing::warn!("Bus subscriptions ended");
                            break;
                        }
                    },
                    _ = shutdown.recv() => {
                        tracing::info!("📡 Bus consumer shutting down");
                        return;
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            _ = shutdown.recv() => return,
        }
    }
}
