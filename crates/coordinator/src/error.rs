use thiserror::Error;
use uuid::Uuid;

use crate::transaction::TransactionState;

/// Errors surfaced by the transaction coordinator.
///
/// Participant failures are not errors at this level — they become state
/// transitions on the transaction record. These variants cover misuse
/// (unknown transaction, operation invalid in the current state) only.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No transaction with the given ID.
    #[error("transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// The requested operation is not valid in the transaction's state.
    #[error("cannot {operation} a transaction in state {state}")]
    InvalidState {
        operation: &'static str,
        state: TransactionState,
    },

    /// A transaction was begun with no participants.
    #[error("transaction requires at least one participant")]
    NoParticipants,
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
