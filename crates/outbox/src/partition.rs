//! Partition assignment for outbox events.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::OutboxEvent;

/// How an event is mapped to a partition.
///
/// `KeyHash` and `AggregateId` are deterministic: the same key always
/// lands on the same partition, preserving per-key ordering across calls.
#[derive(Clone)]
pub enum PartitionStrategy {
    /// Rotate through partitions.
    RoundRobin,

    /// Hash of a header-supplied key (falls back to the aggregate ID when
    /// the `partition-key` header is absent).
    KeyHash,

    /// Hash of the aggregate ID.
    AggregateId,

    /// Caller-supplied mapping.
    Custom(Arc<dyn Fn(&OutboxEvent) -> u32 + Send + Sync>),
}

impl std::fmt::Debug for PartitionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionStrategy::RoundRobin => write!(f, "RoundRobin"),
            PartitionStrategy::KeyHash => write!(f, "KeyHash"),
            PartitionStrategy::AggregateId => write!(f, "AggregateId"),
            PartitionStrategy::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Header consulted by the `KeyHash` strategy.
pub const PARTITION_KEY_HEADER: &str = "partition-key";

/// Assigns partitions to outbox events before they are enqueued.
#[derive(Debug)]
pub struct Partitioner {
    strategy: PartitionStrategy,
    partition_count: u32,
    round_robin: AtomicU64,
}

impl Partitioner {
    /// Creates a partitioner with the given strategy and lane count.
    ///
    /// A `partition_count` of zero is treated as one.
    pub fn new(strategy: PartitionStrategy, partition_count: u32) -> Self {
        Self {
            strategy,
            partition_count: partition_count.max(1),
            round_robin: AtomicU64::new(0),
        }
    }

    /// Number of partition lanes.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Computes the partition for an event.
    pub fn partition_for(&self, event: &OutboxEvent) -> u32 {
        match &self.strategy {
            PartitionStrategy::RoundRobin => {
                (self.round_robin.fetch_add(1, Ordering::Relaxed) % self.partition_count as u64)
                    as u32
            }
            PartitionStrategy::KeyHash => {
                let key = event
                    .headers
                    .get(PARTITION_KEY_HEADER)
                    .cloned()
                    .unwrap_or_else(|| event.aggregate_id.to_string());
                hash_to_partition(&key, self.partition_count)
            }
            PartitionStrategy::AggregateId => {
                hash_to_partition(&event.aggregate_id.to_string(), self.partition_count)
            }
            PartitionStrategy::Custom(f) => f(event) % self.partition_count,
        }
    }

    /// Computes and stamps the partition onto the event.
    pub fn assign(&self, event: &mut OutboxEvent) {
        event.partition = self.partition_for(event);
    }
}

fn hash_to_partition(key: &str, partition_count: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partition_count as u64) as u32
}
