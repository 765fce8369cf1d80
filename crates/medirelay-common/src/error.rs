//! Common error types for Medirelay components.

use thiserror::Error;

/// Common errors across Medirelay components
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// Presence directory unreachable or returned garbage
    #[error("Presence store error: {0}")]
    Store(String),

    /// Cross-instance bus unreachable
    #[error("Bus error: {0}")]
    Bus(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The transport is closed or its send queue is full
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
}

impl SignalError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(_) => 503,
            Self::Bus(_) => 503,
            Self::InvalidInput(_) => 400,
            Self::Serialization(_) => 400,
            Self::ConnectionClosed(_) => 410,
        }
    }

    /// Returns true if the failure came from an external collaborator
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Bus(_))
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SignalError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(SignalError::Store("down".into()).status_code(), 503);
        assert!(SignalError::Bus("down".into()).is_retryable());
        assert!(!SignalError::ConnectionClosed("c1".into()).is_retryable());
    }
}
