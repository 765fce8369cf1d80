//! Core types shared across Medirelay components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::SignalError;

/// Clinician service level.
///
/// Doubles as a registry partition and as a matchmaking preference.
/// Fallback order when no preference is given (or it is exhausted) is
/// [`Tier::PRIORITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Community health officer
    Cho,
    /// Medical officer
    Mo,
    /// Civil clinician
    Civil,
}

impl Tier {
    /// Fixed fallback scan order
    pub const PRIORITY: [Tier; 3] = [Tier::Cho, Tier::Mo, Tier::Civil];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cho => "CHO",
            Self::Mo => "MO",
            Self::Civil => "CIVIL",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CHO" => Ok(Self::Cho),
            "MO" => Ok(Self::Mo),
            "CIVIL" => Ok(Self::Civil),
            other => Err(SignalError::InvalidInput(format!("unknown tier: {other}"))),
        }
    }
}

/// Which side of a session a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "patient")]
    Patient,
    #[serde(rename = "doctor", alias = "clinician")]
    Clinician,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patient => f.write_str("patient"),
            Self::Clinician => f.write_str("doctor"),
        }
    }
}

/// Registry partition key. Identities are unique within a partition only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Patient,
    Clinician(Tier),
}

impl Partition {
    /// Build the partition for a role, requiring a tier for clinicians
    pub fn for_role(role: Role, tier: Option<Tier>) -> Result<Self, SignalError> {
        match (role, tier) {
            (Role::Patient, _) => Ok(Self::Patient),
            (Role::Clinician, Some(tier)) => Ok(Self::Clinician(tier)),
            (Role::Clinician, None) => Err(SignalError::InvalidInput(
                "clinician registration requires a level".to_string(),
            )),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Patient => Role::Patient,
            Self::Clinician(_) => Role::Clinician,
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::Patient => None,
            Self::Clinician(tier) => Some(*tier),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patient => f.write_str("patient"),
            Self::Clinician(tier) => write!(f, "doctor:{tier}"),
        }
    }
}

/// Process-local connection identifier (random, URL-safe)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(random_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relay target: an identity, optionally narrowed to one role.
///
/// Without a role the registry is searched patient-first, then clinician
/// tiers in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Recipient {
    pub fn new(identity: impl Into<String>, role: Option<Role>) -> Self {
        Self {
            identity: identity.into(),
            role,
        }
    }

    pub fn patient(identity: impl Into<String>) -> Self {
        Self::new(identity, Some(Role::Patient))
    }

    pub fn clinician(identity: impl Into<String>) -> Self {
        Self::new(identity, Some(Role::Clinician))
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Some(role) => write!(f, "{role}/{}", self.identity),
            None => f.write_str(&self.identity),
        }
    }
}

/// Clinician availability as published to the presence directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Shared, TTL-bound availability entry for one clinician.
///
/// A record whose deadline has passed is treated exactly like a missing
/// record, even if the store has not reaped it yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Clinician identity
    #[serde(rename = "doctorID")]
    pub identity: String,

    /// Connection currently carrying this clinician
    #[serde(rename = "socketID")]
    pub connection_id: ConnectionId,

    /// Service level
    #[serde(rename = "level")]
    pub tier: Tier,

    pub status: PresenceStatus,

    /// Last heartbeat (Unix epoch millis)
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,

    /// Liveness deadline (Unix epoch millis)
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl PresenceRecord {
    /// Create an online record valid for `ttl` from now
    pub fn online(
        identity: impl Into<String>,
        connection_id: ConnectionId,
        tier: Tier,
        ttl: Duration,
    ) -> Self {
        let now = now_millis();
        Self {
            identity: identity.into(),
            connection_id,
            tier,
            status: PresenceStatus::Online,
            last_seen: now,
            expires_at: now.saturating_add(ttl_millis(ttl)),
        }
    }

    /// Record a heartbeat and push the deadline out by `ttl`
    pub fn refresh(&mut self, ttl: Duration) {
        let now = now_millis();
        self.last_seen = now;
        self.expires_at = now.saturating_add(ttl_millis(ttl));
    }

    /// Online and not past its deadline at `now` (epoch millis)
    pub fn is_live_at(&self, now: i64) -> bool {
        self.status == PresenceStatus::Online && now < self.expires_at
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(now_millis())
    }
}

/// 12 random bytes, URL-safe base64 (16 chars)
pub fn random_token() -> String {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use rand::Rng;

    let mut bytes = [0u8; 12];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Current Unix time in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}
