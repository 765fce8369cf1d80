//! Redis pub/sub bus.
//!
//! Each topic maps to the channel `{prefix}{topic}`; envelopes travel as
//! JSON. Publishing goes through the shared connection manager, each
//! subscription opens its own pub/sub connection.

use async_trait::async_trait;
use futures::StreamExt;
use medirelay_common::{Envelope, SignalError, Topic};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{Bus, EnvelopeStream};

#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
    channel_prefix: String,
}

impl RedisBus {
    pub fn new(client: redis::Client, publisher: ConnectionManager, channel_prefix: impl Into<String>) -> Self {
        Self {
            client,
            publisher,
            channel_prefix: channel_prefix.into(),
        }
    }

    fn channel(&self, topic: Topic) -> String {
        format!("{}{}", self.channel_prefix, topic)
    }
}

fn bus_err(err: redis::RedisError) -> SignalError {
    SignalError::Bus(err.to_string())
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<(), SignalError> {
        let channel = self.channel(topic);
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(&channel, payload).await.map_err(bus_err)?;

        tracing::trace!(
            channel = %channel,
            receivers,
            envelope_id = %envelope.id,
            "Published envelope"
        );
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<EnvelopeStream, SignalError> {
        let channel = self.channel(topic);
        let mut pubsub = self.client.get_async_pubsub().await.map_err(bus_err)?;
        pubsub.subscribe(&channel).await.map_err(bus_err)?;

        tracing::info!(channel = %channel, "Subscribed to bus channel");

        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let channel = channel.clone();
            async move {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Unreadable bus payload");
                        return None;
                    }
                };
                match serde_json::from_str::<Envelope>(&payload) {
                    Ok(envelope) => Some(envelope),
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Invalid bus envelope");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), SignalError> {
        let mut conn = self.publisher.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(bus_err)?;
        Ok(())
    }
}
