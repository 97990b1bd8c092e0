//! The two-phase-commit coordinator.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::Result;
use crate::error::CoordinatorError;
use crate::participant::{Participant, ParticipantContext, ParticipantState};
use crate::transaction::{TransactionRecord, TransactionState};

/// Configuration for the transaction coordinator.
#[derive(Debug, Clone)]
pub struct TransactionCoordinatorConfig {
    /// Identifier recorded on every transaction this coordinator begins.
    pub coordinator_id: String,

    /// Default transaction timeout enforced by the reaper.
    pub default_timeout: Duration,

    /// How often the reaper scans for expired transactions.
    pub reaper_interval: Duration,
}

impl Default for TransactionCoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: "coordinator".to_string(),
            default_timeout: Duration::from_secs(30),
            reaper_interval: Duration::from_secs(5),
        }
    }
}

struct TxEntry {
    record: TransactionRecord,
    participants: Vec<Arc<dyn Participant>>,
}

/// Drives two-phase commit across named participants.
///
/// Every mutation of one transaction happens under that transaction's
/// exclusive lock; distinct transactions proceed independently. Expected
/// participant failures become state transitions on the record, never
/// errors out of the public API.
pub struct TransactionCoordinator {
    config: TransactionCoordinatorConfig,
    transactions: Arc<RwLock<HashMap<Uuid, Arc<Mutex<TxEntry>>>>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionCoordinator {
    /// Creates a coordinator with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TransactionCoordinatorConfig::default())
    }

    /// Creates a coordinator with the given configuration.
    pub fn with_config(config: TransactionCoordinatorConfig) -> Self {
        Self {
            config,
            transactions: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            reaper: Mutex::new(None),
        }
    }

    /// Begins a transaction over the given participants.
    #[tracing::instrument(skip(self, participants, context))]
    pub async fn begin(
        &self,
        participants: Vec<Arc<dyn Participant>>,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<Uuid> {
        self.begin_with_timeout(participants, context, self.config.default_timeout)
            .await
    }

    /// Begins a transaction with an explicit timeout.
    pub async fn begin_with_timeout(
        &self,
        participants: Vec<Arc<dyn Participant>>,
        context: HashMap<String, serde_json::Value>,
        timeout: Duration,
    ) -> Result<Uuid> {
        if participants.is_empty() {
            return Err(CoordinatorError::NoParticipants);
        }

        let ids = participants.iter().map(|p| p.id().to_string()).collect();
        let record =
            TransactionRecord::new(self.config.coordinator_id.clone(), ids, context, timeout);
        let id = record.id;

        self.transactions.write().await.insert(
            id,
            Arc::new(Mutex::new(TxEntry {
                record,
                participants,
            })),
        );

        metrics::counter!("tx_coordinator_begun").increment(1);
        tracing::info!(transaction_id = %id, "transaction begun");
        Ok(id)
    }

    /// Phase one: collect prepare votes.
    ///
    /// Returns true when every participant voted yes (state `Prepared`).
    /// The first failure stops the round, sets the transaction `Failed`,
    /// and returns false — the caller must then [`abort`](Self::abort).
    #[tracing::instrument(skip(self))]
    pub async fn prepare(&self, transaction_id: Uuid) -> Result<bool> {
        let entry = self.entry(transaction_id).await?;
        let mut entry = entry.lock().await;

        if !entry.record.state.can_prepare() {
            return Err(CoordinatorError::InvalidState {
                operation: "prepare",
                state: entry.record.state,
            });
        }

        entry.record.transition(TransactionState::Preparing);
        let ctx = participant_context(&entry.record);

        for participant in entry.participants.clone() {
            let id = participant.id().to_string();
            match participant.prepare(&ctx).await {
                Ok(()) => {
                    if let Some(p) = entry.record.participant_mut(&id) {
                        p.state = ParticipantState::Prepared;
                        p.prepared_at = Some(Utc::now());
                    }
                }
                Err(e) => {
                    // Unanimity broken: remaining participants are never
                    // asked to prepare.
                    if let Some(p) = entry.record.participant_mut(&id) {
                        p.state = ParticipantState::Failed;
                        p.last_error = Some(e.to_string());
                    }
                    entry.record.last_error = Some(format!("prepare failed on {id}: {e}"));
                    entry.record.transition(TransactionState::Failed);
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        participant = %id,
                        error = %e,
                        "prepare vote failed"
                    );
                    return Ok(false);
                }
            }
        }

        entry.record.transition(TransactionState::Prepared);
        Ok(true)
    }

    /// Phase two: instruct every participant to commit.
    ///
    /// Valid only from `Prepared`. Every participant is asked even after
    /// a failure, so as many as possible land; any failure leaves the
    /// transaction `Failed` with per-participant outcomes recorded — an
    /// irrecoverable state requiring operator intervention.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, transaction_id: Uuid) -> Result<bool> {
        let entry = self.entry(transaction_id).await?;
        let mut entry = entry.lock().await;

        if !entry.record.state.can_commit() {
            return Err(CoordinatorError::InvalidState {
                operation: "commit",
                state: entry.record.state,
            });
        }

        entry.record.transition(TransactionState::Committing);
        let ctx = participant_context(&entry.record);
        let mut all_committed = true;

        for participant in entry.participants.clone() {
            let id = participant.id().to_string();
            match participant.commit(&ctx).await {
                Ok(()) => {
                    if let Some(p) = entry.record.participant_mut(&id) {
                        p.state = ParticipantState::Committed;
                        p.committed_at = Some(Utc::now());
                    }
                }
                Err(e) => {
                    all_committed = false;
                    if let Some(p) = entry.record.participant_mut(&id) {
                        p.state = ParticipantState::Failed;
                        p.last_error = Some(e.to_string());
                    }
                    entry.record.last_error = Some(format!("commit failed on {id}: {e}"));
                    tracing::error!(
                        transaction_id = %transaction_id,
                        participant = %id,
                        error = %e,
                        "commit failed after unanimous prepare"
                    );
                }
            }
        }

        if all_committed {
            entry.record.transition(TransactionState::Committed);
            metrics::counter!("tx_coordinator_committed").increment(1);
            tracing::info!(transaction_id = %transaction_id, "transaction committed");
        } else {
            entry.record.transition(TransactionState::Failed);
            metrics::counter!("tx_coordinator_failed").increment(1);
        }

        Ok(all_committed)
    }

    /// Aborts the transaction, rolling back participants that prepared.
    ///
    /// Participants that never reached `Prepared` are skipped — abort is
    /// a no-op for them by contract.
    #[tracing::instrument(skip(self))]
    pub async fn abort(&self, transaction_id: Uuid) -> Result<()> {
        let entry = self.entry(transaction_id).await?;
        let mut entry = entry.lock().await;
        self.abort_locked(&mut entry, TransactionState::Aborted)
            .await;
        Ok(())
    }

    /// Convenience: begin, prepare, then commit or abort.
    pub async fn execute(
        &self,
        participants: Vec<Arc<dyn Participant>>,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<TransactionRecord> {
        let id = self.begin(participants, context).await?;

        if self.prepare(id).await? {
            self.commit(id).await?;
        } else {
            self.abort(id).await?;
        }

        self.get(id)
            .await?
            .ok_or(CoordinatorError::TransactionNotFound(id))
    }

    /// Returns a snapshot of the transaction record.
    pub async fn get(&self, transaction_id: Uuid) -> Result<Option<TransactionRecord>> {
        let transactions = self.transactions.read().await;
        match transactions.get(&transaction_id) {
            Some(entry) => Ok(Some(entry.lock().await.record.clone())),
            None => Ok(None),
        }
    }

    /// Starts the background timeout reaper.
    pub async fn start_reaper(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let transactions = Arc::clone(&self.transactions);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.config.reaper_interval;

        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        reap_expired(&transactions).await;
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
        *self.reaper.lock().await = Some(handle);
    }

    /// Stops the reaper and waits for it to finish.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        if let Some(handle) = self.reaper.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn entry(&self, transaction_id: Uuid) -> Result<Arc<Mutex<TxEntry>>> {
        self.transactions
            .read()
            .await
            .get(&transaction_id)
            .cloned()
            .ok_or(CoordinatorError::TransactionNotFound(transaction_id))
    }

    async fn abort_locked(&self, entry: &mut TxEntry, terminal: TransactionState) {
        if entry.record.state.is_terminal() {
            return;
        }

        entry.record.transition(TransactionState::Aborting);
        let ctx = participant_context(&entry.record);

        for participant in entry.participants.clone() {
            let id = participant.id().to_string();
            let prepared = entry
                .record
                .participant(&id)
                .is_some_and(|p| p.state == ParticipantState::Prepared);
            if !prepared {
                continue;
            }

            match participant.abort(&ctx).await {
                Ok(()) => {
                    if let Some(p) = entry.record.participant_mut(&id) {
                        p.state = ParticipantState::Aborted;
                        p.aborted_at = Some(Utc::now());
                    }
                }
                Err(e) => {
                    if let Some(p) = entry.record.participant_mut(&id) {
                        p.state = ParticipantState::Failed;
                        p.last_error = Some(e.to_string());
                    }
                    entry.record.last_error = Some(format!("abort failed on {id}: {e}"));
                    tracing::error!(participant = %id, error = %e, "abort call failed");
                }
            }
        }

        entry.record.transition(terminal);
        metrics::counter!("tx_coordinator_aborted").increment(1);
        tracing::info!(transaction_id = %entry.record.id, state = %terminal, "transaction aborted");
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn participant_context(record: &TransactionRecord) -> ParticipantContext {
    ParticipantContext {
        transaction_id: record.id,
        coordinator_id: record.coordinator_id.clone(),
        context: record.context.clone(),
    }
}

async fn reap_expired(transactions: &RwLock<HashMap<Uuid, Arc<Mutex<TxEntry>>>>) {
    let now = Utc::now();
    let entries: Vec<Arc<Mutex<TxEntry>>> = transactions.read().await.values().cloned().collect();

    for entry in entries {
        let mut entry = entry.lock().await;
        if entry.record.state.is_terminal() || !entry.record.is_expired(now) {
            continue;
        }

        tracing::warn!(
            transaction_id = %entry.record.id,
            age_secs = now.signed_duration_since(entry.record.created_at).num_seconds(),
            "transaction timed out"
        );

        // Roll back whoever prepared, then mark TimedOut.
        entry.record.transition(TransactionState::Aborting);
        let ctx = participant_context(&entry.record);
        for participant in entry.participants.clone() {
            let id = participant.id().to_string();
            let prepared = entry
                .record
                .participant(&id)
                .is_some_and(|p| p.state == ParticipantState::Prepared);
            if !prepared {
                continue;
            }
            match participant.abort(&ctx).await {
                Ok(()) => {
                    if let Some(p) = entry.record.participant_mut(&id) {
                        p.state = ParticipantState::Aborted;
                        p.aborted_at = Some(Utc::now());
                    }
                }
                Err(e) => {
                    if let Some(p) = entry.record.participant_mut(&id) {
                        p.state = ParticipantState::Failed;
                        p.last_error = Some(e.to_string());
                    }
                }
            }
        }
        entry.record.transition(TransactionState::TimedOut);
        metrics::counter!("tx_coordinator_timed_out").increment(1);
    }
}
