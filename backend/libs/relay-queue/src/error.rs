//! Error types for the relay queue library

use thiserror::Error;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur while publishing or consuming delta events
#[derive(Error, Debug)]
pub enum RelayError {
    /// Broker round-trip failed (connection, timeout, command error)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Message body could not be decoded into a delta event.
    /// Redelivery cannot repair this, so consumers reject these permanently.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Event could not be serialized for publishing
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ack/nack/reject for a delivery this consumer does not hold
    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),
}

impl RelayError {
    /// Errors worth retrying after a pause (broker unreachable or slow).
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}
