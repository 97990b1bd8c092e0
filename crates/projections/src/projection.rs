//! Core projection trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_store::EventEnvelope;

use crate::Result;

/// A projection folds events into a denormalized read model.
///
/// The checkpoint is the timestamp of the last event applied; the manager
/// advances it after every single successful `handle`, never after a whole
/// batch, so a crash re-applies at most one event. Handlers should
/// therefore be idempotent with respect to the read model.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Returns the name of this projection.
    fn name(&self) -> &'static str;

    /// Event types this projection consumes.
    fn interested_in(&self) -> &[&str];

    /// Applies a single event to the read model.
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    /// Timestamp of the last applied event, or None if nothing was applied.
    async fn checkpoint(&self) -> Option<DateTime<Utc>>;

    /// Advances the checkpoint. Called by the manager after `handle`.
    async fn set_checkpoint(&self, timestamp: DateTime<Utc>);

    /// Clears the read model and the checkpoint.
    async fn reset(&self) -> Result<()>;
}
