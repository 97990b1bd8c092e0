//! Participant contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a participant for one protocol call.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// The participant voted no or could not apply the operation.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The participant could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// State of one participant within a transaction.
///
/// Transitions only move forward: Started → Prepared → Committed, or any
/// non-terminal state → Aborted/Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantState {
    /// Enrolled; no protocol call has succeeded yet.
    Started,

    /// Voted yes to prepare.
    Prepared,

    /// Commit acknowledged (terminal).
    Committed,

    /// Abort acknowledged (terminal).
    Aborted,

    /// A protocol call failed (terminal).
    Failed,
}

impl std::fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParticipantState::Started => "Started",
            ParticipantState::Prepared => "Prepared",
            ParticipantState::Committed => "Committed",
            ParticipantState::Aborted => "Aborted",
            ParticipantState::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Context handed to every participant call.
#[derive(Debug, Clone)]
pub struct ParticipantContext {
    /// The distributed transaction's identifier.
    pub transaction_id: Uuid,

    /// The coordinator driving the transaction.
    pub coordinator_id: String,

    /// Transaction-scoped shared data.
    pub context: HashMap<String, serde_json::Value>,
}

/// One party in a two-phase commit.
///
/// Implementations wrap the remote service's prepare/commit/abort
/// endpoints. `abort` must be idempotent: the coordinator may call it for
/// a participant that never prepared.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Stable identifier for this participant.
    fn id(&self) -> &str;

    /// Phase one: vote on whether the transaction can commit.
    async fn prepare(&self, ctx: &ParticipantContext) -> Result<(), ParticipantError>;

    /// Phase two: make the prepared changes durable.
    async fn commit(&self, ctx: &ParticipantContext) -> Result<(), ParticipantError>;

    /// Undo any prepared changes.
    async fn abort(&self, ctx: &ParticipantContext) -> Result<(), ParticipantError>;
}

#[derive(Debug, Default)]
struct InMemoryParticipantState {
    prepare_calls: u32,
    commit_calls: u32,
    abort_calls: u32,
    fail_on_prepare: bool,
    fail_on_commit: bool,
    fail_on_abort: bool,
}

/// In-memory participant for testing.
#[derive(Debug, Clone)]
pub struct InMemoryParticipant {
    id: String,
    state: Arc<RwLock<InMemoryParticipantState>>,
}

impl InMemoryParticipant {
    /// Creates a participant with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(RwLock::new(InMemoryParticipantState::default())),
        }
    }

    /// Makes the next prepare calls fail while set.
    pub fn set_fail_on_prepare(&self, fail: bool) {
        self.state.write().unwrap().fail_on_prepare = fail;
    }

    /// Makes the next commit calls fail while set.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().unwrap().fail_on_commit = fail;
    }

    /// Makes the next abort calls fail while set.
    pub fn set_fail_on_abort(&self, fail: bool) {
        self.state.write().unwrap().fail_on_abort = fail;
    }

    /// Number of prepare calls received.
    pub fn prepare_calls(&self) -> u32 {
        self.state.read().unwrap().prepare_calls
    }

    /// Number of commit calls received.
    pub fn commit_calls(&self) -> u32 {
        self.state.read().unwrap().commit_calls
    }

    /// Number of abort calls received.
    pub fn abort_calls(&self) -> u32 {
        self.state.read().unwrap().abort_calls
    }
}

#[async_trait]
impl Participant for InMemoryParticipant {
    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(&self, _ctx: &ParticipantContext) -> Result<(), ParticipantError> {
        let mut state = self.state.write().unwrap();
        state.prepare_calls += 1;
        if state.fail_on_prepare {
            return Err(ParticipantError::Rejected("prepare refused".to_string()));
        }
        Ok(())
    }

    async fn commit(&self, _ctx: &ParticipantContext) -> Result<(), ParticipantError> {
        let mut state = self.state.write().unwrap();
        state.commit_calls += 1;
        if state.fail_on_commit {
            return Err(ParticipantError::Unavailable("commit failed".to_string()));
        }
        Ok(())
    }

    async fn abort(&self, _ctx: &ParticipantContext) -> Result<(), ParticipantError> {
        let mut state = self.state.write().unwrap();
        state.abort_calls += 1;
        if state.fail_on_abort {
            return Err(ParticipantError::Unavailable("abort failed".to_string()));
        }
        Ok(())
    }
}
