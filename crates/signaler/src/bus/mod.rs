//! Cross-instance bus.
//!
//! Moves [`Envelope`]s between signaler processes that share no memory.
//! Delivery is at-least-once with no deduplication; ordering holds only
//! per publisher. Publishing is one-way, nothing waits for a consumer.

use async_trait::async_trait;
use futures::stream::BoxStream;
use medirelay_common::{Envelope, SignalError, Topic};

mod memory;
mod redis_pubsub;

pub use self::memory::MemoryBus;
pub use self::redis_pubsub::RedisBus;

/// Stream of decoded envelopes from one topic
pub type EnvelopeStream = BoxStream<'static, Envelope>;

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<(), SignalError>;

    async fn subscribe(&self, topic: Topic) -> Result<EnvelopeStream, SignalError>;

    /// Connectivity probe for readiness checks
    async fn ping(&self) -> Result<(), SignalError> {
        Ok(())
    }
}
