use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Snapshot, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected current version of the stream. If set, the append fails
    /// with `ConcurrencyConflict` unless the stream is exactly at this
    /// version. If None, no check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Options with no version check.
    pub fn any() -> Self {
        Self::default()
    }

    /// Options expecting the stream to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Options expecting a brand-new stream.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Contract for event store backends.
///
/// Appends are atomic: either every event in the batch is stored or none
/// is. Implementations must be thread-safe.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events to one aggregate stream.
    ///
    /// Returns the stream's new version. With an expected version set,
    /// a mismatch returns `ConcurrencyConflict` and stores nothing.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Returns all events for an aggregate, oldest first.
    async fn events_for_aggregate(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Returns events for an aggregate at or after `from_version`.
    ///
    /// Callers resuming from a snapshot pass `snapshot.version.next()`.
    async fn events_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Returns events matching the query, ordered by timestamp then version.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Streams every event in the store in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Returns the current version of an aggregate stream, or None if the
    /// stream has no events.
    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Stores a snapshot, replacing any existing one for the aggregate.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Returns the latest snapshot for an aggregate, if any.
    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

/// Convenience methods layered over any event store.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event.
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    /// Returns true if the aggregate has any events.
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.current_version(aggregate_id).await?.is_some())
    }

    /// Returns all events of one type, ordered by timestamp.
    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        self.query_events(EventQuery::new().event_type(event_type))
            .await
    }

    /// Loads an aggregate's snapshot (if any) and the events after it.
    async fn load_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        if let Some(snapshot) = self.load_snapshot(aggregate_id).await? {
            let events = self
                .events_from_version(aggregate_id, snapshot.version.next())
                .await?;
            Ok((Some(snapshot), events))
        } else {
            let events = self.events_for_aggregate(aggregate_id).await?;
            Ok((None, events))
        }
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a batch before appending: non-empty, one aggregate, and
/// sequential versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let first = events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("empty event batch".to_string()))?;

    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must belong to the same aggregate".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must have the same aggregate type".to_string(),
            ));
        }
    }

    let mut expected = first.version;
    for event in events.iter().skip(1) {
        expected = expected.next();
        if event.version != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                expected, event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Account")
            .event_type("Test")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
    }

    #[test]
    fn validate_rejects_empty_batch() {
        assert!(matches!(
            validate_events_for_append(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn validate_rejects_mixed_aggregates() {
        let events = vec![envelope(AggregateId::new(), 1), envelope(AggregateId::new(), 2)];
        assert!(validate_events_for_append(&events).is_err());
    }

    #[test]
    fn validate_rejects_version_gaps() {
        let id = AggregateId::new();
        let events = vec![envelope(id, 1), envelope(id, 3)];
        assert!(validate_events_for_append(&events).is_err());
    }

    #[test]
    fn validate_accepts_sequential_batch() {
        let id = AggregateId::new();
        let events = vec![envelope(id, 1), envelope(id, 2), envelope(id, 3)];
        assert!(validate_events_for_append(&events).is_ok());
    }
}
