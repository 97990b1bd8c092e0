//! Multi-level read/write consistency over a local cache with peer
//! replication.
//!
//! [`ConsistencyLevel::Strong`] is a best-effort majority-count
//! approximation — peers are counted and asked to acknowledge, but no
//! consensus protocol runs underneath (no leader election, no replicated
//! log). Callers must not rely on it for linearizability beyond
//! read-your-writes; the weaker levels trade that guarantee away
//! explicitly.

pub mod cache;
pub mod entry;
pub mod error;
pub mod level;
pub mod peer;

pub use cache::{
    CacheStats, DistributedCache, DistributedCacheConfig, LogOnlyReconcile, ReconcileStrategy,
};
pub use entry::CacheEntry;
pub use error::{ConsistencyError, Result};
pub use level::ConsistencyLevel;
pub use peer::{InMemoryPeer, Peer};
