//! Shared constants for Medirelay components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default signaler listen address (HTTP + WebSocket)
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5001";

/// Clinician presence record lifetime without a heartbeat (seconds)
pub const PRESENCE_TTL_SECS: u64 = 30;

/// Per-connection outbound queue depth
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// How long a delivered bus envelope id is remembered (seconds)
pub const DEDUP_WINDOW_SECS: u64 = 120;

/// WebSocket ping interval (seconds)
pub const PING_INTERVAL_SECS: u64 = 30;

/// Redis key prefixes
pub mod redis_keys {
    /// Clinician presence: presence:{tier}:{identity}
    pub const PRESENCE_PREFIX: &str = "presence:";

    /// Default pub/sub channel prefix: {prefix}{topic}
    pub const BUS_CHANNEL_PREFIX: &str = "medirelay:";
}

/// Cross-instance bus topic names
pub mod topics {
    /// offer / answer / ice / hangup
    pub const SIGNALING_EVENTS: &str = "signaling-events";

    /// incoming-call / doctor-assigned
    pub const CALL_REQUESTS: &str = "call-requests";

    /// handover-start / incoming-handover / renegotiate
    pub const CALL_HANDOVER: &str = "call-handover";
}
