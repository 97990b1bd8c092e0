//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The stream moved while the aggregate was in memory. The caller
    /// should reload the aggregate and retry the command.
    #[error("version conflict on {aggregate_id}: expected {expected}, found {actual}")]
    Conflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// Aggregate not found.
    #[error("aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// The command was rejected by the aggregate's business rules.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// An error occurred in the event store.
    #[error("event store error: {0}")]
    EventStore(EventStoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<EventStoreError> for DomainError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => DomainError::Conflict {
                aggregate_id,
                expected,
                actual,
            },
            other => DomainError::EventStore(other),
        }
    }
}
