//! Two-phase commit across injected participants.
//!
//! The [`TransactionCoordinator`] collects unanimous prepare votes before
//! instructing unanimous commit; any single failure aborts every
//! participant that reached prepared. A commit that fails on some
//! participants leaves the transaction [`TransactionState::Failed`] — the
//! protocol's classic blocking weakness, preserved deliberately for
//! operator escalation rather than papered over with silent retries. A
//! background reaper aborts transactions that outlive their timeout.

pub mod coordinator;
pub mod error;
pub mod participant;
pub mod transaction;

pub use coordinator::{TransactionCoordinator, TransactionCoordinatorConfig};
pub use error::{CoordinatorError, Result};
pub use participant::{
    InMemoryParticipant, Participant, ParticipantContext, ParticipantError, ParticipantState,
};
pub use transaction::{ParticipantRecord, TransactionRecord, TransactionState};
