//! Projection error types.

use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the event store.
    #[error("event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// Failed to deserialize an event payload.
    #[error("event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A handler failed while applying an event.
    #[error("projection {projection} failed on {event_type}: {message}")]
    Handler {
        projection: &'static str,
        event_type: String,
        message: String,
    },

    /// No projection registered under the given name.
    #[error("unknown projection: {0}")]
    UnknownProjection(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
