//! Saga orchestration: multi-step workflows with compensating rollback.
//!
//! A [`SagaDefinition`] names its steps, their handlers and compensations;
//! the [`SagaOrchestrator`] worker pool executes steps sequentially under
//! per-step timeout and retry, and on a critical failure compensates the
//! completed steps in strict reverse order. Step failures become state
//! transitions on the [`SagaTransaction`]; the orchestrator API errs only
//! on misuse (unknown saga, invalid definition).

pub mod definition;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod state;
pub mod transaction;

pub use definition::{SagaDefinition, SagaDefinitionBuilder, SagaStep, SagaStepBuilder};
pub use error::{Result, SagaError};
pub use handler::{HandlerRegistry, StepContext};
pub use orchestrator::{SagaOrchestrator, SagaOrchestratorConfig};
pub use state::SagaState;
pub use transaction::SagaTransaction;
