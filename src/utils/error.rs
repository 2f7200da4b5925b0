//! Error types shared across the `relayq` crate.
//!
//! Losing an optimistic-lock race is deliberately *not* represented here:
//! conditional store operations report it as `0` rows affected.

use thiserror::Error;

/// Result alias used by broker-level operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Failures raised by a record store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedded sled database reported an error.
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    /// A row could not be encoded or decoded.
    #[error("failed to encode or decode row: {0}")]
    Codec(#[from] serde_json::Error),

    /// A decoded row violates the lease invariant.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The store cannot currently be reached.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to callers of the broker API.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{field} must be non-empty and free of NUL bytes")]
    InvalidName { field: &'static str },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Rejects an empty channel or service name, or one holding a NUL byte.
    ///
    /// NUL separates channel from service in subscription keys.
    pub fn require_name(field: &'static str, value: &str) -> Result<()> {
        if value.trim().is_empty() || value.contains('\0') {
            Err(Self::InvalidName { field })
        } else {
            Ok(())
        }
    }
}

/// Reasons a delivery callback can reject an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// No connection is registered for the recipient.
    #[error("recipient {0} is not connected")]
    Unreachable(String),

    /// The recipient answered with a negative acknowledgement.
    #[error("recipient rejected delivery: {0}")]
    Rejected(String),

    /// The connection went away before an answer arrived.
    #[error("delivery channel closed")]
    Closed,

    /// No answer arrived within the acknowledgement window.
    #[error("no acknowledgement after {0}ms")]
    TimedOut(u64),
}
