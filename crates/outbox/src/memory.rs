//! In-memory outbox repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::OutboxError;
use crate::event::{OutboxEvent, OutboxStatus};
use crate::repository::{OutboxRepository, OutboxStats};
use crate::Result;

/// In-memory outbox for tests and embedded use.
///
/// Cannot join the caller's database transaction, so the
/// atomic-with-business-write contract is the caller's responsibility
/// here; the PostgreSQL implementation provides it via `enqueue_in_tx`.
#[derive(Clone, Default)]
pub struct InMemoryOutboxRepository {
    events: Arc<RwLock<HashMap<Uuid, OutboxEvent>>>,
}

impl InMemoryOutboxRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events in any state.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns true if the repository holds no events.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    async fn update<F>(&self, event_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut OutboxEvent),
    {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&event_id)
            .ok_or(OutboxError::EventNotFound(event_id))?;
        f(event);
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn enqueue(&self, event: OutboxEvent) -> Result<()> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.event_id) {
            return Err(OutboxError::InvalidEvent(format!(
                "duplicate event id {}",
                event.event_id
            )));
        }
        events.insert(event.event_id, event);
        Ok(())
    }

    async fn claim_batch(&self, partition: Option<u32>, limit: usize) -> Result<Vec<OutboxEvent>> {
        let now = Utc::now();
        let mut events = self.events.write().await;

        // Expire lapsed events in passing.
        for event in events.values_mut() {
            if event.status == OutboxStatus::Pending && event.is_expired(now) {
                event.status = OutboxStatus::Skipped;
            }
        }

        let mut due: Vec<&OutboxEvent> = events
            .values()
            .filter(|e| e.is_due(now) && partition.is_none_or(|p| e.partition == p))
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        let claimed_ids: Vec<Uuid> = due.iter().take(limit).map(|e| e.event_id).collect();
        let mut claimed = Vec::with_capacity(claimed_ids.len());
        for id in claimed_ids {
            if let Some(event) = events.get_mut(&id) {
                event.status = OutboxStatus::Processing;
                claimed.push(event.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_completed(&self, event_id: Uuid, duration_ms: i64) -> Result<()> {
        self.update(event_id, |event| {
            event.status = OutboxStatus::Completed;
            event.attempt_count += 1;
            event.processed_at = Some(Utc::now());
            event.processing_duration_ms = Some(duration_ms);
            event.next_retry_at = None;
            event.last_error = None;
        })
        .await
    }

    async fn mark_retry(
        &self,
        event_id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(event_id, |event| {
            event.status = OutboxStatus::Pending;
            event.attempt_count += 1;
            event.last_error = Some(error.to_string());
            event.next_retry_at = Some(next_retry_at);
        })
        .await
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> Result<()> {
        self.update(event_id, |event| {
            event.status = OutboxStatus::Failed;
            event.attempt_count += 1;
            event.last_error = Some(error.to_string());
        })
        .await
    }

    async fn mark_dead_letter(&self, event_id: Uuid, error: &str) -> Result<()> {
        self.update(event_id, |event| {
            event.status = OutboxStatus::DeadLetter;
            event.attempt_count += 1;
            event.last_error = Some(error.to_string());
        })
        .await
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>> {
        Ok(self.events.read().await.get(&event_id).cloned())
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|_, e| {
            !(e.status == OutboxStatus::Completed
                && e.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - events.len()) as u64)
    }

    async fn stats(&self) -> Result<OutboxStats> {
        let events = self.events.read().await;
        let mut stats = OutboxStats::default();
        let mut durations: Vec<i64> = Vec::new();

        for event in events.values() {
            match event.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::Processing => stats.processing += 1,
                OutboxStatus::Completed => stats.completed += 1,
                OutboxStatus::Failed => stats.failed += 1,
                OutboxStatus::DeadLetter => stats.dead_letter += 1,
                OutboxStatus::Skipped => stats.skipped += 1,
            }
            if let Some(ms) = event.processing_duration_ms {
                durations.push(ms);
            }
            stats.total_payload_bytes += event.payload.to_string().len() as u64;
        }

        if !durations.is_empty() {
            durations.sort_unstable();
            let sum: i64 = durations.iter().sum();
            stats.avg_processing_ms = Some(sum as f64 / durations.len() as f64);
            let p95_index = ((durations.len() as f64) * 0.95).ceil() as usize - 1;
            stats.p95_processing_ms = Some(durations[p95_index.min(durations.len() - 1)] as f64);
        }

        Ok(stats)
    }
}
