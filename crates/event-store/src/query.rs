use chrono::{DateTime, Utc};

use crate::{AggregateId, Version};

/// Filter criteria for reading events across streams.
///
/// `after_timestamp` is exclusive and exists for checkpoint-driven
/// consumers (projections poll for events strictly newer than their
/// checkpoint); the from/to bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Restrict to one aggregate stream.
    pub aggregate_id: Option<AggregateId>,

    /// Restrict to one aggregate type.
    pub aggregate_type: Option<String>,

    /// Restrict to any of these event types.
    pub event_types: Option<Vec<String>>,

    /// Minimum version (inclusive).
    pub from_version: Option<Version>,

    /// Maximum version (inclusive).
    pub to_version: Option<Version>,

    /// Events at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Events strictly after this timestamp.
    pub after_timestamp: Option<DateTime<Utc>>,

    /// Events at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,

    /// Number of matching events to skip.
    pub offset: Option<usize>,
}

impl EventQuery {
    /// Creates an empty query matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one aggregate stream.
    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Default::default()
        }
    }

    /// Creates a query for events of the given types.
    pub fn for_event_types(event_types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            event_types: Some(event_types.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Restricts to one aggregate stream.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Restricts to one aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Restricts to one event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types = Some(vec![event_type.into()]);
        self
    }

    /// Restricts to any of the given event types.
    pub fn event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    /// Minimum version (inclusive).
    pub fn from_version(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    /// Maximum version (inclusive).
    pub fn to_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    /// Events at or after this timestamp.
    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    /// Events strictly after this timestamp.
    pub fn after_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.after_timestamp = Some(timestamp);
        self
    }

    /// Events at or before this timestamp.
    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    /// Limits the number of events returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many matching events.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the envelope fields match every set filter except
    /// limit/offset (which are positional, not per-event).
    pub fn matches(&self, event: &crate::EventEnvelope) -> bool {
        if let Some(id) = self.aggregate_id
            && event.aggregate_id != id
        {
            return false;
        }
        if let Some(ref agg_type) = self.aggregate_type
            && &event.aggregate_type != agg_type
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.contains(&event.event_type)
        {
            return false;
        }
        if let Some(from) = self.from_version
            && event.version < from
        {
            return false;
        }
        if let Some(to) = self.to_version
            && event.version > to
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && event.timestamp < from
        {
            return false;
        }
        if let Some(after) = self.after_timestamp
            && event.timestamp <= after
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && event.timestamp > to
        {
            return false;
        }
        true
    }
}
