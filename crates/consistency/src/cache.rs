//! The distributed cache and its policy engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::Result;
use crate::entry::CacheEntry;
use crate::error::ConsistencyError;
use crate::level::ConsistencyLevel;
use crate::peer::Peer;

/// Configuration for the distributed cache.
#[derive(Debug, Clone)]
pub struct DistributedCacheConfig {
    /// Default TTL applied to entries (None = no expiry).
    pub default_ttl: Option<Duration>,

    /// Staleness bound for [`ConsistencyLevel::BoundedStaleness`] reads.
    pub max_staleness: Duration,

    /// How often the eviction loop removes expired entries.
    pub eviction_interval: Duration,

    /// How often the anti-entropy loop runs reconciliation.
    pub anti_entropy_interval: Duration,
}

impl Default for DistributedCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(300)),
            max_staleness: Duration::from_secs(5),
            eviction_interval: Duration::from_secs(30),
            anti_entropy_interval: Duration::from_secs(60),
        }
    }
}

/// Counters describing the cache's behavior over its lifetime.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Entries currently stored.
    pub entries: usize,

    /// Reads that found a fresh, valid entry.
    pub hits: u64,

    /// Reads that found nothing usable.
    pub misses: u64,

    /// Entries discarded because their checksum did not match.
    pub corruption_drops: u64,

    /// Entries removed by the eviction loop.
    pub evictions: u64,
}

/// Hook for the anti-entropy loop: compares local entries against peers
/// and repairs divergence. The default implementation only reports.
#[async_trait]
pub trait ReconcileStrategy: Send + Sync {
    /// Reconciles local state with the peers; returns the number of keys
    /// found divergent.
    async fn reconcile(
        &self,
        entries: &HashMap<String, CacheEntry>,
        peers: &[Arc<dyn Peer>],
    ) -> usize;
}

/// Reports divergence without repairing it.
pub struct LogOnlyReconcile;

#[async_trait]
impl ReconcileStrategy for LogOnlyReconcile {
    async fn reconcile(
        &self,
        entries: &HashMap<String, CacheEntry>,
        peers: &[Arc<dyn Peer>],
    ) -> usize {
        let mut divergent = 0;
        for (key, entry) in entries {
            for peer in peers {
                if peer.healthy().await && !peer.confirm(key, entry.version).await {
                    divergent += 1;
                    break;
                }
            }
        }
        if divergent > 0 {
            tracing::warn!(divergent, "anti-entropy found divergent keys");
        }
        divergent
    }
}

/// A local cache replicated to peers under selectable consistency levels.
///
/// Strong writes require a majority of known healthy peers to
/// acknowledge before the local write lands; strong reads require a
/// majority to confirm the local version. This is a counting
/// approximation of quorum, not consensus — documented on the crate root.
pub struct DistributedCache {
    config: DistributedCacheConfig,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    peers: Vec<Arc<dyn Peer>>,
    reconcile: Arc<dyn ReconcileStrategy>,
    // Highest version handed out per key, for monotonic session reads.
    session_floor: Arc<RwLock<HashMap<String, u64>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    corruption_drops: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    replications: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl DistributedCache {
    /// Creates a cache with the given peers and default reconciliation.
    pub fn new(config: DistributedCacheConfig, peers: Vec<Arc<dyn Peer>>) -> Self {
        Self::with_reconcile(config, peers, Arc::new(LogOnlyReconcile))
    }

    /// Creates a cache with a custom reconciliation strategy.
    pub fn with_reconcile(
        config: DistributedCacheConfig,
        peers: Vec<Arc<dyn Peer>>,
        reconcile: Arc<dyn ReconcileStrategy>,
    ) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
            peers,
            reconcile,
            session_floor: Arc::new(RwLock::new(HashMap::new())),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            corruption_drops: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            workers: Mutex::new(Vec::new()),
            replications: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Writes a value under the given consistency level.
    ///
    /// Returns the entry's new version.
    #[tracing::instrument(skip(self, value))]
    pub async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        level: ConsistencyLevel,
    ) -> Result<u64> {
        // The write guard is held across peer calls so that concurrent
        // puts to the same key cannot mint the same version.
        let mut entries = self.entries.write().await;
        let entry = match entries.get(key) {
            Some(existing) => existing.replaced_with(value, self.config.default_ttl),
            None => CacheEntry::new(value, self.config.default_ttl),
        };
        let version = entry.version;

        match level {
            ConsistencyLevel::Strong => {
                let healthy = self.healthy_peers().await;
                let required = majority(healthy.len());
                let mut acked = 0;
                for peer in &healthy {
                    if peer.replicate(key, &entry).await {
                        acked += 1;
                    }
                }
                if acked < required {
                    metrics::counter!("cache_quorum_failures").increment(1);
                    return Err(ConsistencyError::QuorumNotReached { required, acked });
                }
                entries.insert(key.to_string(), entry);
            }
            _ => {
                // Local write now, replication in the background.
                entries.insert(key.to_string(), entry.clone());
                drop(entries);
                self.spawn_replication(key.to_string(), entry).await;
            }
        }

        metrics::counter!("cache_writes").increment(1);
        Ok(version)
    }

    /// Reads a value under the given consistency level.
    ///
    /// Checksum mismatches are treated as corruption: the entry is
    /// dropped and the read misses. Bounded-staleness and session
    /// violations also read as misses.
    #[tracing::instrument(skip(self))]
    pub async fn get(
        &self,
        key: &str,
        level: ConsistencyLevel,
    ) -> Result<Option<serde_json::Value>> {
        let now = Utc::now();
        let entry = {
            let entries = self.entries.read().await;
            entries.get(key).cloned()
        };

        let Some(entry) = entry else {
            return Ok(self.miss());
        };

        if !entry.verify() {
            self.entries.write().await.remove(key);
            self.corruption_drops.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("cache_corruption_drops").increment(1);
            tracing::warn!(key, "cache entry failed checksum, dropped");
            return Ok(self.miss());
        }

        if entry.is_expired(now) {
            self.entries.write().await.remove(key);
            return Ok(self.miss());
        }

        match level {
            ConsistencyLevel::Weak | ConsistencyLevel::Eventual => {}
            ConsistencyLevel::BoundedStaleness => {
                if entry.age(now) > self.config.max_staleness {
                    tracing::debug!(key, "read rejected: entry exceeds staleness bound");
                    return Ok(self.miss());
                }
            }
            ConsistencyLevel::Session => {
                let mut floor = self.session_floor.write().await;
                let seen = floor.entry(key.to_string()).or_insert(0);
                if entry.version < *seen {
                    tracing::debug!(key, "read rejected: older than session floor");
                    return Ok(self.miss());
                }
                *seen = entry.version;
            }
            ConsistencyLevel::Strong => {
                let healthy = self.healthy_peers().await;
                let required = majority(healthy.len());
                let mut acked = 0;
                for peer in &healthy {
                    if peer.confirm(key, entry.version).await {
                        acked += 1;
                    }
                }
                if acked < required {
                    metrics::counter!("cache_quorum_failures").increment(1);
                    return Err(ConsistencyError::QuorumNotReached { required, acked });
                }
            }
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(entry.value))
    }

    /// Removes a key locally.
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
        self.session_floor.write().await.remove(key);
    }

    /// Number of entries currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot of the cache's counters.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corruption_drops: self.corruption_drops.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Starts the eviction and anti-entropy loops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock().await;

        let entries = Arc::clone(&self.entries);
        let evictions = Arc::clone(&self.evictions);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.config.eviction_interval;
        workers.push(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let now = Utc::now();
                        let mut entries = entries.write().await;
                        let before = entries.len();
                        entries.retain(|_, entry| !entry.is_expired(now));
                        let evicted = (before - entries.len()) as u64;
                        if evicted > 0 {
                            evictions.fetch_add(evicted, Ordering::Relaxed);
                            tracing::debug!(evicted, "evicted expired cache entries");
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        }));

        let entries = Arc::clone(&self.entries);
        let peers = self.peers.clone();
        let reconcile = Arc::clone(&self.reconcile);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.config.anti_entropy_interval;
        workers.push(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let snapshot = entries.read().await.clone();
                        let divergent = reconcile.reconcile(&snapshot, &peers).await;
                        metrics::gauge!("cache_divergent_keys").set(divergent as f64);
                    }
                    _ = shutdown.notified() => break,
                }
            }
        }));
    }

    /// Stops the background loops and joins outstanding replications.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }

        let mut replications = self.replications.lock().await;
        for handle in replications.drain(..) {
            let _ = handle.await;
        }
    }

    async fn healthy_peers(&self) -> Vec<Arc<dyn Peer>> {
        let mut healthy = Vec::new();
        for peer in &self.peers {
            if peer.healthy().await {
                healthy.push(Arc::clone(peer));
            }
        }
        healthy
    }

    async fn spawn_replication(&self, key: String, entry: CacheEntry) {
        if self.peers.is_empty() {
            return;
        }

        let peers = self.peers.clone();
        let handle = tokio::spawn(async move {
            for peer in peers {
                if peer.healthy().await && !peer.replicate(&key, &entry).await {
                    tracing::debug!(key, peer = peer.id(), "background replication failed");
                }
            }
        });

        let mut replications = self.replications.lock().await;
        // Drop handles of replications that already finished.
        replications.retain(|h| !h.is_finished());
        replications.push(handle);
    }

    fn miss(&self) -> Option<serde_json::Value> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_misses").increment(1);
        None
    }
}

/// Majority of `n` peers; zero peers means no quorum is needed.
fn majority(n: usize) -> usize {
    if n == 0 { 0 } else { n / 2 + 1 }
}
