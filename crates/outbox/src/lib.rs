//! Transactional outbox: outbound events enqueued atomically with local
//! state changes and delivered asynchronously to a message broker.
//!
//! The caller writes the [`OutboxEvent`] in the same database transaction
//! as its business mutation (`enqueue_in_tx`); that co-location is the
//! correctness contract of the pattern. The [`OutboxProcessor`] worker
//! pool later polls pending events per partition, publishes them in
//! batches, and retries with exponential backoff until each event is
//! completed, dead-lettered, or failed.

pub mod broker;
pub mod error;
pub mod event;
pub mod memory;
pub mod partition;
pub mod postgres;
pub mod processor;
pub mod repository;

pub use broker::{BrokerMessage, InMemoryBroker, MessageBroker};
pub use error::{OutboxError, Result};
pub use event::{OutboxEvent, OutboxEventBuilder, OutboxStatus};
pub use memory::InMemoryOutboxRepository;
pub use partition::{PartitionStrategy, Partitioner};
pub use postgres::PostgresOutboxRepository;
pub use processor::{OutboxProcessor, OutboxProcessorConfig};
pub use repository::{OutboxRepository, OutboxStats};
