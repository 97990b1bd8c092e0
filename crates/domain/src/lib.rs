//! Write-side domain layer: event-sourced aggregates and their repository.
//!
//! An [`AggregateRoot`] buffers newly raised events and applies them to its
//! in-memory state immediately; the [`Repository`] persists the buffered
//! events with optimistic concurrency and maintains snapshots.

pub mod aggregate;
pub mod error;
pub mod repository;
pub mod root;

pub use aggregate::{Aggregate, DomainEvent, SnapshotCapable};
pub use error::DomainError;
pub use repository::Repository;
pub use root::AggregateRoot;
