//! Test doubles for unreachable collaborators.

use std::time::Duration;

use async_trait::async_trait;
use medirelay_common::{Envelope, PresenceRecord, SignalError, Tier, Topic};

use crate::bus::{Bus, EnvelopeStream};
use crate::presence::PresenceDirectory;

fn down() -> SignalError {
    SignalError::Store("connection refused".to_string())
}

/// Presence directory whose every call fails
pub struct FailingDirectory;

#[async_trait]
impl PresenceDirectory for FailingDirectory {
    async fn put(&self, _record: &PresenceRecord, _ttl: Duration) -> Result<(), SignalError> {
        Err(down())
    }

    async fn refresh(&self, _tier: Tier, _identity: &str, _ttl: Duration) -> Result<bool, SignalError> {
        Err(down())
    }

    async fn get(&self, _tier: Tier, _identity: &str) -> Result<Option<PresenceRecord>, SignalError> {
        Err(down())
    }

    async fn get_all(&self, _tier: Tier) -> Result<Vec<PresenceRecord>, SignalError> {
        Err(down())
    }

    async fn delete(&self, _tier: Tier, _identity: &str) -> Result<(), SignalError> {
        Err(down())
    }

    async fn ping(&self) -> Result<(), SignalError> {
        Err(down())
    }
}

/// Bus that refuses to publish or subscribe
pub struct FailingBus;

#[async_trait]
impl Bus for FailingBus {
    async fn publish(&self, _topic: Topic, _envelope: &Envelope) -> Result<(), SignalError> {
        Err(SignalError::Bus("connection refused".to_string()))
    }

    async fn subscribe(&self, _topic: Topic) -> Result<EnvelopeStream, SignalError> {
        Err(SignalError::Bus("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), SignalError> {
        Err(SignalError::Bus("connection refused".to_string()))
    }
}
