//! Repository: loads aggregate roots and persists their uncommitted events.

use std::marker::PhantomData;

use common::{AggregateId, CorrelationId};
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreExt, Snapshot, Version,
};

use crate::aggregate::{Aggregate, DomainEvent, SnapshotCapable};
use crate::error::DomainError;
use crate::root::AggregateRoot;

/// Loads aggregates from the event store (snapshot plus tail replay) and
/// persists uncommitted events with optimistic concurrency.
///
/// On a version conflict the save returns [`DomainError::Conflict`] and
/// persists nothing; the caller reloads the aggregate and retries.
pub struct Repository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> Repository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a repository backed by the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate root, returning a fresh one if the stream is empty.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<AggregateRoot<A>, DomainError>
    where
        A: for<'de> serde::Deserialize<'de>,
    {
        let (snapshot, events) = self.store.load_aggregate(aggregate_id).await?;

        let mut root = if let Some(snapshot) = snapshot {
            let version = snapshot.version;
            let state: A = serde_json::from_value(snapshot.state)?;
            AggregateRoot::from_state(state, version)
        } else {
            AggregateRoot::new()
        };

        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            root.replay(event, envelope.version);
        }

        Ok(root)
    }

    /// Loads an aggregate root, or None if the aggregate does not exist.
    pub async fn get_by_id(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRoot<A>>, DomainError>
    where
        A: for<'de> serde::Deserialize<'de>,
    {
        let root = self.load(aggregate_id).await?;
        Ok(root.id().is_some().then_some(root))
    }

    /// Persists the root's uncommitted events and marks them committed.
    ///
    /// Returns the new stream version; a no-op when nothing is buffered.
    pub async fn save(
        &self,
        aggregate_id: AggregateId,
        root: &mut AggregateRoot<A>,
    ) -> Result<Version, DomainError> {
        self.save_correlated(aggregate_id, root, None).await
    }

    /// Like [`save`](Self::save), stamping every envelope with the given
    /// correlation ID.
    #[tracing::instrument(skip(self, root), fields(aggregate_type = A::aggregate_type()))]
    pub async fn save_correlated(
        &self,
        aggregate_id: AggregateId,
        root: &mut AggregateRoot<A>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<Version, DomainError> {
        if !root.has_uncommitted() {
            return Ok(root.version());
        }

        let current_version = root.version();
        let envelopes =
            build_envelopes::<A>(aggregate_id, current_version, root.uncommitted_events(), correlation_id)?;
        let count = envelopes.len() as u64;

        let new_version = self
            .store
            .append(envelopes, AppendOptions::expect_version(current_version))
            .await?;

        root.mark_committed(new_version);
        metrics::counter!("domain_events_persisted").increment(count);

        Ok(new_version)
    }
}

impl<S, A> Repository<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
{
    /// Persists uncommitted events and writes a snapshot when the new
    /// version crosses the aggregate's snapshot interval.
    pub async fn save_with_snapshot(
        &self,
        aggregate_id: AggregateId,
        root: &mut AggregateRoot<A>,
    ) -> Result<Version, DomainError> {
        let new_version = self.save(aggregate_id, root).await?;

        if A::should_snapshot(new_version) {
            let snapshot = Snapshot::from_state(
                aggregate_id,
                A::aggregate_type(),
                new_version,
                root.state(),
            )?;
            self.store.save_snapshot(snapshot).await?;
            tracing::debug!(%aggregate_id, version = %new_version, "snapshot written");
        }

        Ok(new_version)
    }
}

fn build_envelopes<A: Aggregate>(
    aggregate_id: AggregateId,
    current_version: Version,
    events: &[A::Event],
    correlation_id: Option<CorrelationId>,
) -> Result<Vec<EventEnvelope>, DomainError> {
    let mut envelopes = Vec::with_capacity(events.len());
    let mut version = current_version;

    for event in events {
        version = version.next();
        let mut builder = EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type(A::aggregate_type())
            .event_type(event.event_type())
            .version(version)
            .payload(event)?;
        if let Some(correlation_id) = correlation_id {
            builder = builder.correlation_id(correlation_id);
        }
        envelopes.push(builder.build());
    }

    Ok(envelopes)
}
