use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an outbox event.
///
/// Terminal states are `Completed`, `Failed`, `DeadLetter` and `Skipped`;
/// `Pending` and `Processing` events always move on eventually (retries
/// are bounded by `max_attempts`, expiry by `expires_at`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting to be picked up by a worker.
    Pending,

    /// Claimed by a worker; publish in flight.
    Processing,

    /// Published successfully (terminal).
    Completed,

    /// Retries exhausted with dead-lettering disabled (terminal).
    Failed,

    /// Retries exhausted and routed to the dead-letter topic (terminal).
    DeadLetter,

    /// Expired before it could be published (terminal).
    Skipped,
}

impl OutboxStatus {
    /// Database/string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLetter => "dead_letter",
            OutboxStatus::Skipped => "skipped",
        }
    }

    /// Parses the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "processing" => Some(OutboxStatus::Processing),
            "completed" => Some(OutboxStatus::Completed),
            "failed" => Some(OutboxStatus::Failed),
            "dead_letter" => Some(OutboxStatus::DeadLetter),
            "skipped" => Some(OutboxStatus::Skipped),
            _ => None,
        }
    }

    /// Returns true for states the processor never revisits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboxStatus::Completed
                | OutboxStatus::Failed
                | OutboxStatus::DeadLetter
                | OutboxStatus::Skipped
        )
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One durable outbound message.
///
/// `event_id` is globally unique and doubles as the idempotency key for
/// consumers. Events are enqueued inside the caller's database
/// transaction and mutated only by the processor afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Globally unique identifier / idempotency key.
    pub event_id: Uuid,

    /// The aggregate whose change produced this event.
    pub aggregate_id: AggregateId,

    /// The type of that aggregate.
    pub aggregate_type: String,

    /// The event type name.
    pub event_type: String,

    /// Destination topic.
    pub topic: String,

    /// The message payload as JSON.
    pub payload: serde_json::Value,

    /// Headers forwarded to the broker.
    pub headers: HashMap<String, String>,

    /// Delivery lane; events in one partition are delivered in
    /// priority-then-insertion order.
    pub partition: u32,

    /// Current lifecycle status.
    pub status: OutboxStatus,

    /// Lower values are delivered first within a partition.
    pub priority: i32,

    /// Publish attempts made so far.
    pub attempt_count: u32,

    /// Attempts allowed before the event is dead-lettered or failed.
    pub max_attempts: u32,

    /// Message of the most recent failure.
    pub last_error: Option<String>,

    /// Identifier of the logical operation this event belongs to.
    pub correlation_id: Option<CorrelationId>,

    /// When the event was enqueued.
    pub created_at: DateTime<Utc>,

    /// Earliest time the event may be delivered.
    pub scheduled_at: DateTime<Utc>,

    /// Backoff gate set after a failed attempt.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// When the event was published successfully.
    pub processed_at: Option<DateTime<Utc>>,

    /// Wall-clock time the successful publish took.
    pub processing_duration_ms: Option<i64>,

    /// Events not published by this time are skipped.
    pub expires_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Creates a new builder.
    pub fn builder() -> OutboxEventBuilder {
        OutboxEventBuilder::default()
    }

    /// Returns true if the event has passed its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns true if the event is due for delivery at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending
            && self.scheduled_at <= now
            && self.next_retry_at.is_none_or(|at| at <= now)
            && !self.is_expired(now)
    }
}

/// Builder for outbox events.
#[derive(Debug, Default)]
pub struct OutboxEventBuilder {
    event_id: Option<Uuid>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    event_type: Option<String>,
    topic: Option<String>,
    payload: Option<serde_json::Value>,
    headers: HashMap<String, String>,
    partition: u32,
    priority: i32,
    max_attempts: Option<u32>,
    correlation_id: Option<CorrelationId>,
    scheduled_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl OutboxEventBuilder {
    /// Sets the event ID. A random ID is generated if not set.
    pub fn event_id(mut self, id: Uuid) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the source aggregate.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Sets the source aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the event type name.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the destination topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Serializes a value into the payload.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a broker header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the partition directly (usually done via [`Partitioner`]).
    ///
    /// [`Partitioner`]: crate::Partitioner
    pub fn partition(mut self, partition: u32) -> Self {
        self.partition = partition;
        self
    }

    /// Sets the priority (lower delivers first).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the maximum number of publish attempts.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Delays delivery until the given time.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Skips the event if it is still unpublished at the given time.
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Builds the event.
    ///
    /// # Panics
    ///
    /// Panics if aggregate_id, aggregate_type, event_type, topic, or
    /// payload are not set.
    pub fn build(self) -> OutboxEvent {
        let now = Utc::now();
        OutboxEvent {
            event_id: self.event_id.unwrap_or_else(Uuid::new_v4),
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            aggregate_type: self.aggregate_type.expect("aggregate_type is required"),
            event_type: self.event_type.expect("event_type is required"),
            topic: self.topic.expect("topic is required"),
            payload: self.payload.expect("payload is required"),
            headers: self.headers,
            partition: self.partition,
            status: OutboxStatus::Pending,
            priority: self.priority,
            attempt_count: 0,
            max_attempts: self.max_attempts.unwrap_or(3),
            last_error: None,
            correlation_id: self.correlation_id,
            created_at: now,
            scheduled_at: self.scheduled_at.unwrap_or(now),
            next_retry_at: None,
            processed_at: None,
            processing_duration_ms: None,
            expires_at: self.expires_at,
        }
    }
}
