//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are immutable facts, named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name used for storage and filtering.
    fn event_type(&self) -> &'static str;
}

/// An event-sourced aggregate.
///
/// Aggregates are rebuilt by replaying events and updated by applying
/// them; `apply` must be pure and deterministic — it records a fact that
/// has already happened and cannot fail.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate's command methods can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier, or None before the first event.
    fn id(&self) -> Option<AggregateId>;

    /// Applies an event to the aggregate, updating its state.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// Aggregates that support snapshotting.
///
/// The interval is the `snapshot_frequency` knob: a snapshot is written
/// after every `snapshot_interval` persisted versions.
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Number of events between snapshots.
    fn snapshot_interval() -> u64 {
        100
    }

    /// Returns whether a snapshot should be written at `version`.
    fn should_snapshot(version: Version) -> bool {
        let v = version.as_i64();
        v > 0 && (v as u64).is_multiple_of(Self::snapshot_interval())
    }
}
