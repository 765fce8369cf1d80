//! # Medirelay Common
//!
//! Shared types, wire messages, and utilities used across Medirelay components.
//!
//! ## Modules
//! - `types` - Core data structures (Tier, Role, PresenceRecord, etc.)
//! - `protocol` - Client/server WebSocket messages and the bus envelope
//! - `error` - Common error types
//! - `constants` - Shared configuration constants

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::SignalError;
pub use protocol::*;
pub use types::*;
