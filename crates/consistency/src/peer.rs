//! Replication peer contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::entry::CacheEntry;

/// A replica node the cache pushes writes to and confirms reads against.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Stable identifier for this peer.
    fn id(&self) -> &str;

    /// Whether the peer currently counts toward quorum.
    async fn healthy(&self) -> bool;

    /// Pushes an entry to the peer. Returns true when acknowledged.
    async fn replicate(&self, key: &str, entry: &CacheEntry) -> bool;

    /// Asks the peer to confirm it holds `key` at `version` or newer.
    async fn confirm(&self, key: &str, version: u64) -> bool;
}

#[derive(Debug, Default)]
struct InMemoryPeerState {
    entries: HashMap<String, CacheEntry>,
    healthy: bool,
    fail_replicate: bool,
}

/// In-memory peer for testing.
#[derive(Debug, Clone)]
pub struct InMemoryPeer {
    id: String,
    state: Arc<RwLock<InMemoryPeerState>>,
}

impl InMemoryPeer {
    /// Creates a healthy peer with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(RwLock::new(InMemoryPeerState {
                entries: HashMap::new(),
                healthy: true,
                fail_replicate: false,
            })),
        }
    }

    /// Marks the peer healthy or unhealthy.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.write().unwrap().healthy = healthy;
    }

    /// Makes replicate calls fail while set.
    pub fn set_fail_replicate(&self, fail: bool) {
        self.state.write().unwrap().fail_replicate = fail;
    }

    /// Number of entries replicated to this peer.
    pub fn entry_count(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    /// The replicated entry for a key, if any.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.state.read().unwrap().entries.get(key).cloned()
    }
}

#[async_trait]
impl Peer for InMemoryPeer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn healthy(&self) -> bool {
        self.state.read().unwrap().healthy
    }

    async fn replicate(&self, key: &str, entry: &CacheEntry) -> bool {
        let mut state = self.state.write().unwrap();
        if !state.healthy || state.fail_replicate {
            return false;
        }
        state.entries.insert(key.to_string(), entry.clone());
        true
    }

    async fn confirm(&self, key: &str, version: u64) -> bool {
        let state = self.state.read().unwrap();
        state.healthy
            && state
                .entries
                .get(key)
                .is_some_and(|entry| entry.version >= version)
    }
}
