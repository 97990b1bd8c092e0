use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// No outbox event with the given ID.
    #[error("outbox event not found: {0}")]
    EventNotFound(Uuid),

    /// The event was rejected before being enqueued.
    #[error("invalid outbox event: {0}")]
    InvalidEvent(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The broker rejected a publish call outright.
    #[error("broker error: {0}")]
    Broker(String),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
