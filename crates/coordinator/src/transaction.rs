//! Distributed transaction record and state machine.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::participant::ParticipantState;

/// State of a distributed transaction.
///
/// ```text
/// Started ──► Preparing ──► Prepared ──► Committing ──► Committed
///                 │             │             │
///                 ▼             ▼             ▼
///               Failed ──► Aborting ──►    Aborted
///                                          TimedOut (reaper only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created; no protocol call made yet.
    Started,

    /// Prepare votes being collected.
    Preparing,

    /// Every participant voted yes.
    Prepared,

    /// Commit instructions in flight.
    Committing,

    /// Every participant committed (terminal).
    Committed,

    /// Abort instructions in flight.
    Aborting,

    /// All prepared participants rolled back (terminal).
    Aborted,

    /// A prepare or commit failed; requires abort or operator action.
    Failed,

    /// Aborted by the timeout reaper (terminal).
    TimedOut,
}

impl TransactionState {
    /// Returns true for states the coordinator never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted | TransactionState::TimedOut
        )
    }

    /// Returns true if prepare may be called from this state.
    pub fn can_prepare(&self) -> bool {
        matches!(self, TransactionState::Started)
    }

    /// Returns true if commit may be called from this state.
    pub fn can_commit(&self) -> bool {
        matches!(self, TransactionState::Prepared)
    }

    /// Returns true if abort may be called from this state.
    pub fn can_abort(&self) -> bool {
        matches!(
            self,
            TransactionState::Started
                | TransactionState::Preparing
                | TransactionState::Prepared
                | TransactionState::Failed
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionState::Started => "Started",
            TransactionState::Preparing => "Preparing",
            TransactionState::Prepared => "Prepared",
            TransactionState::Committing => "Committing",
            TransactionState::Committed => "Committed",
            TransactionState::Aborting => "Aborting",
            TransactionState::Aborted => "Aborted",
            TransactionState::Failed => "Failed",
            TransactionState::TimedOut => "TimedOut",
        };
        write!(f, "{s}")
    }
}

/// Per-participant outcome within one transaction.
#[derive(Debug, Clone)]
pub struct ParticipantRecord {
    /// The participant's identifier.
    pub id: String,

    /// Current protocol state.
    pub state: ParticipantState,

    /// When the participant voted yes.
    pub prepared_at: Option<DateTime<Utc>>,

    /// When the participant acknowledged commit.
    pub committed_at: Option<DateTime<Utc>>,

    /// When the participant acknowledged abort.
    pub aborted_at: Option<DateTime<Utc>>,

    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl ParticipantRecord {
    /// Creates a record for a newly enrolled participant.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ParticipantState::Started,
            prepared_at: None,
            committed_at: None,
            aborted_at: None,
            last_error: None,
        }
    }
}

/// One distributed transaction run.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Unique transaction identifier.
    pub id: Uuid,

    /// The coordinator that owns the transaction.
    pub coordinator_id: String,

    /// Current protocol state.
    pub state: TransactionState,

    /// Per-participant outcomes, in enrollment order.
    pub participants: Vec<ParticipantRecord>,

    /// Transaction-scoped shared data.
    pub context: HashMap<String, serde_json::Value>,

    /// Age beyond which the reaper aborts the transaction.
    pub timeout: Duration,

    /// When the transaction was begun.
    pub created_at: DateTime<Utc>,

    /// Last state change.
    pub updated_at: DateTime<Utc>,

    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl TransactionRecord {
    /// Creates a new record in `Started` state.
    pub fn new(
        coordinator_id: impl Into<String>,
        participant_ids: Vec<String>,
        context: HashMap<String, serde_json::Value>,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            coordinator_id: coordinator_id.into(),
            state: TransactionState::Started,
            participants: participant_ids
                .into_iter()
                .map(ParticipantRecord::new)
                .collect(),
            context,
            timeout,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Moves to a new state, stamping `updated_at`.
    pub fn transition(&mut self, state: TransactionState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Returns true if the transaction has outlived its timeout at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.to_std().is_ok_and(|age| age > self.timeout)
    }

    /// The record for one participant.
    pub fn participant(&self, id: &str) -> Option<&ParticipantRecord> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub(crate) fn participant_mut(&mut self, id: &str) -> Option<&mut ParticipantRecord> {
        self.participants.iter_mut().find(|p| p.id == id)
    }
}
