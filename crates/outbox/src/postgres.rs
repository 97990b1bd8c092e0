//! PostgreSQL outbox repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::OutboxError;
use crate::event::{OutboxEvent, OutboxStatus};
use crate::repository::{OutboxRepository, OutboxStats};
use crate::Result;

const OUTBOX_COLUMNS: &str = "event_id, aggregate_id, aggregate_type, event_type, topic, payload, \
     headers, partition_no, status, priority, attempt_count, max_attempts, last_error, \
     correlation_id, created_at, scheduled_at, next_retry_at, processed_at, \
     processing_duration_ms, expires_at";

/// PostgreSQL-backed outbox repository.
///
/// `claim_batch` uses `FOR UPDATE SKIP LOCKED` so parallel workers never
/// claim the same rows; `enqueue_in_tx` lets the event row join the
/// caller's open transaction, which is the pattern's atomicity contract.
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    /// Creates a new PostgreSQL outbox repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueues an event on the caller's open connection/transaction.
    ///
    /// Call this inside the same transaction as the business mutation the
    /// event describes.
    pub async fn enqueue_in_tx(&self, conn: &mut PgConnection, event: &OutboxEvent) -> Result<()> {
        insert_event(conn, event).await
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        let headers_json: serde_json::Value = row.try_get("headers")?;
        let headers: HashMap<String, String> = serde_json::from_value(headers_json)?;
        let status_str: String = row.try_get("status")?;
        let status = OutboxStatus::parse(&status_str).ok_or_else(|| {
            OutboxError::InvalidEvent(format!("unknown outbox status {status_str:?}"))
        })?;

        Ok(OutboxEvent {
            event_id: row.try_get("event_id")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            headers,
            partition: row.try_get::<i32, _>("partition_no")? as u32,
            status,
            priority: row.try_get("priority")?,
            attempt_count: row.try_get::<i32, _>("attempt_count")? as u32,
            max_attempts: row.try_get::<i32, _>("max_attempts")? as u32,
            last_error: row.try_get("last_error")?,
            correlation_id: row
                .try_get::<Option<Uuid>, _>("correlation_id")?
                .map(CorrelationId::from_uuid),
            created_at: row.try_get("created_at")?,
            scheduled_at: row.try_get("scheduled_at")?,
            next_retry_at: row.try_get("next_retry_at")?,
            processed_at: row.try_get("processed_at")?,
            processing_duration_ms: row.try_get("processing_duration_ms")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

async fn insert_event(conn: &mut PgConnection, event: &OutboxEvent) -> Result<()> {
    let headers_json = serde_json::to_value(&event.headers)?;

    sqlx::query(
        r#"
        INSERT INTO outbox_events
            (event_id, aggregate_id, aggregate_type, event_type, topic, payload, headers,
             partition_no, status, priority, attempt_count, max_attempts, last_error,
             correlation_id, created_at, scheduled_at, next_retry_at, processed_at,
             processing_duration_ms, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20)
        "#,
    )
    .bind(event.event_id)
    .bind(event.aggregate_id.as_uuid())
    .bind(&event.aggregate_type)
    .bind(&event.event_type)
    .bind(&event.topic)
    .bind(&event.payload)
    .bind(headers_json)
    .bind(event.partition as i32)
    .bind(event.status.as_str())
    .bind(event.priority)
    .bind(event.attempt_count as i32)
    .bind(event.max_attempts as i32)
    .bind(&event.last_error)
    .bind(event.correlation_id.map(|c| c.as_uuid()))
    .bind(event.created_at)
    .bind(event.scheduled_at)
    .bind(event.next_retry_at)
    .bind(event.processed_at)
    .bind(event.processing_duration_ms)
    .bind(event.expires_at)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn enqueue(&self, event: OutboxEvent) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_event(&mut conn, &event).await
    }

    async fn claim_batch(&self, partition: Option<u32>, limit: usize) -> Result<Vec<OutboxEvent>> {
        let mut tx = self.pool.begin().await?;

        // Retire expired rows first so they never get claimed.
        sqlx::query(
            "UPDATE outbox_events SET status = 'skipped' \
             WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= NOW()",
        )
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r#"
            UPDATE outbox_events SET status = 'processing'
            WHERE event_id IN (
                SELECT event_id FROM outbox_events
                WHERE status = 'pending'
                  AND scheduled_at <= NOW()
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                  AND ($1::int IS NULL OR partition_no = $1)
                ORDER BY priority ASC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(partition.map(|p| p as i32))
            .bind(limit as i64)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut events: Vec<OutboxEvent> = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<Result<_>>()?;
        events.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(events)
    }

    async fn mark_completed(&self, event_id: Uuid, duration_ms: i64) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE outbox_events SET status = 'completed', attempt_count = attempt_count + 1, \
             processed_at = NOW(), processing_duration_ms = $2, next_retry_at = NULL, \
             last_error = NULL WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        event_id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE outbox_events SET status = 'pending', attempt_count = attempt_count + 1, \
             last_error = $2, next_retry_at = $3 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> Result<()> {
        self.set_terminal(event_id, OutboxStatus::Failed, error).await
    }

    async fn mark_dead_letter(&self, event_id: Uuid, error: &str) -> Result<()> {
        self.set_terminal(event_id, OutboxStatus::DeadLetter, error)
            .await
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'completed' AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(deleted.rows_affected())
    }

    async fn stats(&self) -> Result<OutboxStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count, \
             COALESCE(SUM(LENGTH(payload::text)), 0) AS payload_bytes \
             FROM outbox_events GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = OutboxStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let payload_bytes: i64 = row.try_get("payload_bytes")?;
            stats.total_payload_bytes += payload_bytes as u64;
            match OutboxStatus::parse(&status) {
                Some(OutboxStatus::Pending) => stats.pending = count as u64,
                Some(OutboxStatus::Processing) => stats.processing = count as u64,
                Some(OutboxStatus::Completed) => stats.completed = count as u64,
                Some(OutboxStatus::Failed) => stats.failed = count as u64,
                Some(OutboxStatus::DeadLetter) => stats.dead_letter = count as u64,
                Some(OutboxStatus::Skipped) => stats.skipped = count as u64,
                None => {}
            }
        }

        let durations: Option<PgRow> = sqlx::query(
            "SELECT AVG(processing_duration_ms) AS avg_ms, \
             PERCENTILE_CONT(0.95) WITHIN GROUP (ORDER BY processing_duration_ms) AS p95_ms \
             FROM outbox_events WHERE status = 'completed'",
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = durations {
            stats.avg_processing_ms = row.try_get::<Option<f64>, _>("avg_ms")?;
            stats.p95_processing_ms = row.try_get::<Option<f64>, _>("p95_ms")?;
        }

        Ok(stats)
    }
}

impl PostgresOutboxRepository {
    async fn set_terminal(
        &self,
        event_id: Uuid,
        status: OutboxStatus,
        error: &str,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE outbox_events SET status = $2, attempt_count = attempt_count + 1, \
             last_error = $3 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(event_id));
        }
        Ok(())
    }
}
