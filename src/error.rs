//! Error types for the telecall core

use thiserror::Error;

/// Telecall error types
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown session
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is not a session party or lacks the required role
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Duplicate open session or double-end
    #[error("conflict: {0}")]
    Conflict(String),

    /// Join or relay against a session that has already ended
    #[error("session ended: {0}")]
    SessionEnded(String),

    /// Link disconnected or send failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or out-of-order negotiation payload
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Local capture denial or missing media
    #[error("media access error: {0}")]
    MediaAccess(String),

    /// Invalid or expired identity token
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Rate limit exceeded for a throttled operation
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Record store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using telecall Error
pub type Result<T> = std::result::Result<T, Error>;
