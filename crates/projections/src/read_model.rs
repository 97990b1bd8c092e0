//! Read model storage for the query side.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Query access to a denormalized read model.
#[async_trait]
pub trait ReadModel: Send + Sync {
    /// Returns the name of this read model.
    fn name(&self) -> &'static str;

    /// Returns the number of entries.
    async fn count(&self) -> usize;
}

/// Keyed in-memory read model store.
///
/// The reference storage used by projections in tests and embedded
/// deployments; a database-backed model implements the same surface.
#[derive(Clone)]
pub struct InMemoryReadModel<T: Clone + Send + Sync> {
    name: &'static str,
    rows: Arc<RwLock<HashMap<String, T>>>,
}

impl<T: Clone + Send + Sync> InMemoryReadModel<T> {
    /// Creates an empty read model with the given name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the entry under `key`, if any.
    pub async fn get(&self, key: &str) -> Option<T> {
        self.rows.read().await.get(key).cloned()
    }

    /// Inserts or replaces the entry under `key`.
    pub async fn upsert(&self, key: impl Into<String>, value: T) {
        self.rows.write().await.insert(key.into(), value);
    }

    /// Updates the entry under `key` in place, inserting the default first
    /// if it is absent.
    pub async fn update_or_default(&self, key: impl Into<String>, f: impl FnOnce(&mut T))
    where
        T: Default,
    {
        let mut rows = self.rows.write().await;
        f(rows.entry(key.into()).or_default());
    }

    /// Removes the entry under `key`.
    pub async fn remove(&self, key: &str) -> Option<T> {
        self.rows.write().await.remove(key)
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        self.rows.write().await.clear();
    }

    /// Returns all entries, unordered.
    pub async fn all(&self) -> Vec<(String, T)> {
        self.rows
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> ReadModel for InMemoryReadModel<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn count(&self) -> usize {
        self.rows.read().await.len()
    }
}
