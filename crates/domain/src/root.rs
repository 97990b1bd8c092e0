//! Aggregate root wrapper: in-memory state plus the uncommitted buffer.

use event_store::Version;

use crate::aggregate::Aggregate;

/// An aggregate together with its stream position and uncommitted events.
///
/// `raise` applies the event to the in-memory state immediately, so
/// business logic always sees up-to-date state, and buffers the event
/// until [`Repository::save`](crate::Repository::save) persists it. The
/// `version` field is the *persisted* version, used as the expected
/// version for the optimistic append.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    state: A,
    version: Version,
    uncommitted: Vec<A::Event>,
}

impl<A: Aggregate> Default for AggregateRoot<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates a root for a brand-new aggregate.
    pub fn new() -> Self {
        Self {
            state: A::default(),
            version: Version::initial(),
            uncommitted: Vec::new(),
        }
    }

    /// Reconstructs a root from already-persisted state.
    pub fn from_state(state: A, version: Version) -> Self {
        Self {
            state,
            version,
            uncommitted: Vec::new(),
        }
    }

    /// The current in-memory state (committed events plus raised ones).
    pub fn state(&self) -> &A {
        &self.state
    }

    /// The aggregate's identifier, if it has been created.
    pub fn id(&self) -> Option<common::AggregateId> {
        self.state.id()
    }

    /// The persisted stream version (excludes uncommitted events).
    pub fn version(&self) -> Version {
        self.version
    }

    /// Raises a new event: applies it to the state and buffers it.
    pub fn raise(&mut self, event: A::Event) {
        self.state.apply(event.clone());
        self.uncommitted.push(event);
    }

    /// Events raised since the last save.
    pub fn uncommitted_events(&self) -> &[A::Event] {
        &self.uncommitted
    }

    /// Returns true if there are events waiting to be persisted.
    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Replays an already-committed event during loading.
    pub(crate) fn replay(&mut self, event: A::Event, version: Version) {
        self.state.apply(event);
        self.version = version;
    }

    /// Marks the buffered events as persisted at `new_version`.
    pub(crate) fn mark_committed(&mut self, new_version: Version) {
        self.uncommitted.clear();
        self.version = new_version;
    }
}
