//! In-process bus over `tokio::sync::broadcast`.
//!
//! One channel per topic. Several signaler nodes in the same process can
//! share a `MemoryBus` to exercise cross-node delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use medirelay_common::{Envelope, SignalError, Topic};
use tokio::sync::broadcast;

use super::{Bus, EnvelopeStream};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub struct MemoryBus {
    channels: HashMap<Topic, broadcast::Sender<Envelope>>,
    published: AtomicU64,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let channels = Topic::ALL
            .into_iter()
            .map(|topic| (topic, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self {
            channels,
            published: AtomicU64::new(0),
        }
    }

    /// Total envelopes published since creation
    #[cfg(test)]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Live subscriptions on a topic
    #[cfg(test)]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.channels.get(&topic).map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, topic: Topic) -> Result<&broadcast::Sender<Envelope>, SignalError> {
        self.channels
            .get(&topic)
            .ok_or_else(|| SignalError::Bus(format!("unknown topic {topic}")))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<(), SignalError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        // No subscribers is not an error: nobody holds the target
        let receivers = self.sender(topic)?.send(envelope.clone()).unwrap_or(0);
        tracing::trace!(topic = %topic, receivers, envelope_id = %envelope.id, "Published envelope");
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<EnvelopeStream, SignalError> {
        let rx = self.sender(topic)?.subscribe();
        let stream = futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => return Some((envelope, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(topic = %topic, skipped, "Bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medirelay_common::{Recipient, ServerMessage};

    fn envelope(target: &str) -> Envelope {
        Envelope::new(Recipient::patient(target), ServerMessage::HeartbeatAck, None, "node-test")
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_envelopes() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe(Topic::SignalingEvents).await.unwrap();
        let mut second = bus.subscribe(Topic::SignalingEvents).await.unwrap();

        let sent = envelope("p1");
        bus.publish(Topic::SignalingEvents, &sent).await.unwrap();

        assert_eq!(first.next().await.unwrap(), sent);
        assert_eq!(second.next().await.unwrap(), sent);
        assert_eq!(bus.published(), 1);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = MemoryBus::new();
        let mut handover = bus.subscribe(Topic::CallHandover).await.unwrap();

        bus.publish(Topic::SignalingEvents, &envelope("p1")).await.unwrap();
        let sent = envelope("p2");
        bus.publish(Topic::CallHandover, &sent).await.unwrap();

        assert_eq!(handover.next().await.unwrap().id, sent.id);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        tokio_test::assert_ok!(bus.publish(Topic::CallRequests, &envelope("p1")).await);
    }
}
