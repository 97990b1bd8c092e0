//! Saga execution record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::definition::SagaDefinition;
use crate::state::SagaState;

/// One saga execution.
///
/// Invariants maintained by the orchestrator:
/// - `completed_steps.len() + remaining() == definition.len()` minus any
///   skipped non-critical failures;
/// - while compensating, `compensated_steps` only ever contains step IDs
///   also present in `completed_steps`;
/// - when the state is `Compensated`, `compensated_steps` is the exact
///   reverse of `completed_steps`.
#[derive(Debug, Clone)]
pub struct SagaTransaction {
    /// Unique saga identifier.
    pub saga_id: Uuid,

    /// The immutable workflow being executed.
    pub definition: Arc<SagaDefinition>,

    /// Current lifecycle state.
    pub state: SagaState,

    /// Index of the next step to execute.
    pub current_step: usize,

    /// IDs of steps that completed, in execution order.
    pub completed_steps: Vec<Uuid>,

    /// IDs of steps whose compensation completed, in compensation order.
    pub compensated_steps: Vec<Uuid>,

    /// IDs of non-critical steps that failed and were skipped.
    pub skipped_steps: Vec<Uuid>,

    /// Saga-level shared context handed to every handler.
    pub context: HashMap<String, serde_json::Value>,

    /// Message of the most recent failure.
    pub last_error: Option<String>,

    /// When the saga was accepted.
    pub created_at: DateTime<Utc>,

    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl SagaTransaction {
    /// Creates a new saga in `Created` state.
    pub fn new(
        definition: Arc<SagaDefinition>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id: Uuid::new_v4(),
            definition,
            state: SagaState::Created,
            current_step: 0,
            completed_steps: Vec::new(),
            compensated_steps: Vec::new(),
            skipped_steps: Vec::new(),
            context,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to a new state, stamping `updated_at`.
    pub fn transition(&mut self, state: SagaState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Number of steps not yet executed or skipped.
    pub fn remaining(&self) -> usize {
        self.definition.len() - self.current_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SagaStep;

    fn definition() -> Arc<SagaDefinition> {
        Arc::new(
            SagaDefinition::builder("test")
                .step(
                    SagaStep::builder("a")
                        .action("do_a")
                        .compensation("undo_a")
                        .build()
                        .unwrap(),
                )
                .step(
                    SagaStep::builder("b")
                        .action("do_b")
                        .compensation("undo_b")
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn new_saga_starts_created() {
        let saga = SagaTransaction::new(definition(), HashMap::new());
        assert_eq!(saga.state, SagaState::Created);
        assert_eq!(saga.current_step, 0);
        assert_eq!(saga.remaining(), 2);
        assert!(saga.completed_steps.is_empty());
    }

    #[test]
    fn conservation_of_steps() {
        let mut saga = SagaTransaction::new(definition(), HashMap::new());
        let first_id = saga.definition.steps[0].id;

        saga.completed_steps.push(first_id);
        saga.current_step = 1;

        assert_eq!(
            saga.completed_steps.len() + saga.remaining(),
            saga.definition.len()
        );
    }
}
