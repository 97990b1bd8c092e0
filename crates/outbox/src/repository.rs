//! Outbox repository contract and delivery statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;
use crate::event::OutboxEvent;

/// Aggregate statistics over the outbox table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboxStats {
    /// Events waiting for delivery.
    pub pending: u64,

    /// Events claimed by a worker right now.
    pub processing: u64,

    /// Events delivered successfully.
    pub completed: u64,

    /// Events that exhausted retries without dead-lettering.
    pub failed: u64,

    /// Events routed to the dead-letter topic.
    pub dead_letter: u64,

    /// Events that expired before delivery.
    pub skipped: u64,

    /// Mean publish duration over completed events.
    pub avg_processing_ms: Option<f64>,

    /// 95th-percentile publish duration over completed events.
    pub p95_processing_ms: Option<f64>,

    /// Total serialized payload size across all events.
    pub total_payload_bytes: u64,
}

impl OutboxStats {
    /// Total number of events in any state.
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.dead_letter
            + self.skipped
    }
}

/// Storage contract for the outbox.
///
/// `enqueue` is expected to be called inside the same local transaction
/// as the business mutation the event describes — the co-location is what
/// makes the pattern reliable. The database implementation exposes
/// `enqueue_in_tx` for exactly that; the in-memory one cannot give the
/// guarantee and exists for tests and embedded use.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Stores a new pending event.
    async fn enqueue(&self, event: OutboxEvent) -> Result<()>;

    /// Claims up to `limit` due events from one partition (or any
    /// partition when None), marking them `Processing`.
    ///
    /// Events are claimed in priority-then-creation order. Expired events
    /// encountered along the way are marked `Skipped` and not returned.
    async fn claim_batch(&self, partition: Option<u32>, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Records a successful publish.
    async fn mark_completed(&self, event_id: Uuid, duration_ms: i64) -> Result<()>;

    /// Returns a failed event to `Pending` with a backoff gate.
    async fn mark_retry(
        &self,
        event_id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Marks an event terminally failed.
    async fn mark_failed(&self, event_id: Uuid, error: &str) -> Result<()>;

    /// Marks an event dead-lettered.
    async fn mark_dead_letter(&self, event_id: Uuid, error: &str) -> Result<()>;

    /// Fetches one event by ID.
    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>>;

    /// Deletes completed events processed before `cutoff`; returns how
    /// many were removed.
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Computes aggregate statistics.
    async fn stats(&self) -> Result<OutboxStats>;
}
