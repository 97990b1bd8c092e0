//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► Executing ──┬──► Completed
///                         └──► Compensating ──┬──► Compensated
///                                             └──► Failed
/// ```
///
/// `Failed` means compensation itself failed after retries: the saga is
/// partially compensated and needs attention. It is reported, never
/// silently retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Saga accepted but not picked up by a worker yet.
    #[default]
    Created,

    /// Steps are being executed forward.
    Executing,

    /// A critical step failed; compensations are running in reverse.
    Compensating,

    /// All steps completed successfully (terminal).
    Completed,

    /// Compensation finished cleanly after a failure (terminal).
    Compensated,

    /// Compensation failed; the saga is partially compensated (terminal).
    Failed,
}

impl SagaState {
    /// Returns true if a worker may begin executing this saga.
    pub fn can_execute(&self) -> bool {
        matches!(self, SagaState::Created)
    }

    /// Returns true if the saga may enter compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Executing)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Compensated | SagaState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Created => "Created",
            SagaState::Executing => "Executing",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Compensated => "Compensated",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
