//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the sink.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration (fatal at startup).
    #[error("configuration error: {0}")]
    Config(String),

    /// Broker connection, publish, ack or provisioning failures.
    #[error("broker error: {0}")]
    Broker(String),

    /// Delivery metadata could not be read from an inbound message.
    #[error("metadata unavailable: {0}")]
    Metadata(String),

    /// Canonical event failed validation before publishing.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A bounded operation did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A background task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    pub fn invalid_event(msg: impl Into<String>) -> Self {
        Self::InvalidEvent(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
