//! Saga error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the saga engine.
///
/// Step and compensation failures are not represented here — they drive
/// the saga state machine. These variants cover definition mistakes and
/// API misuse, which are caller bugs.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga with the given ID.
    #[error("saga not found: {0}")]
    SagaNotFound(Uuid),

    /// The definition failed validation at build time.
    #[error("invalid saga definition: {0}")]
    InvalidDefinition(String),

    /// The orchestrator is not running.
    #[error("orchestrator is not running")]
    NotRunning,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;
