//! Rebuilding a projection must reproduce the incrementally-built state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, InMemoryEventStore, Version};
use projections::{InMemoryReadModel, Projection, ProjectionManager, ReadModel, Result};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq)]
struct ProfileRow {
    name: String,
    updates: u64,
}

/// Maintains one row per aggregate with its latest name.
struct ProfileProjection {
    rows: InMemoryReadModel<ProfileRow>,
    checkpoint: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl ProfileProjection {
    fn new() -> Self {
        Self {
            rows: InMemoryReadModel::new("profiles"),
            checkpoint: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl Projection for ProfileProjection {
    fn name(&self) -> &'static str {
        "profiles"
    }

    fn interested_in(&self) -> &[&str] {
        &["ProfileCreated", "ProfileRenamed"]
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let key = event.aggregate_id.to_string();
        let name = event.payload["name"].as_str().unwrap_or_default().to_string();

        match event.event_type.as_str() {
            "ProfileCreated" => {
                self.rows
                    .upsert(key, ProfileRow { name, updates: 0 })
                    .await;
            }
            "ProfileRenamed" => {
                self.rows
                    .update_or_default(key, |row| {
                        row.name = name;
                        row.updates += 1;
                    })
                    .await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn checkpoint(&self) -> Option<DateTime<Utc>> {
        *self.checkpoint.read().await
    }

    async fn set_checkpoint(&self, timestamp: DateTime<Utc>) {
        *self.checkpoint.write().await = Some(timestamp);
    }

    async fn reset(&self) -> Result<()> {
        self.rows.clear().await;
        *self.checkpoint.write().await = None;
        Ok(())
    }
}

fn profile_event(
    aggregate_id: AggregateId,
    version: i64,
    event_type: &str,
    name: &str,
) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Profile")
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(serde_json::json!({"name": name}))
        .build()
}

#[tokio::test]
async fn incremental_and_rebuilt_state_are_identical() {
    let store = InMemoryEventStore::new();
    let id = AggregateId::new();

    store
        .append(
            vec![
                profile_event(id, 1, "ProfileCreated", "A"),
                profile_event(id, 2, "ProfileRenamed", "B"),
                profile_event(id, 3, "ProfileRenamed", "C"),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let projection = Arc::new(ProfileProjection::new());
    let rows = projection.rows.clone();

    let mut manager = ProjectionManager::new(store);
    manager.register(projection);

    // Incremental path.
    manager.catch_up().await.unwrap();
    let incremental = rows.get(&id.to_string()).await.unwrap();
    assert_eq!(incremental.name, "C");
    assert_eq!(incremental.updates, 2);

    // Rebuild from scratch must land on the same state.
    manager.rebuild("profiles").await.unwrap();
    let rebuilt = rows.get(&id.to_string()).await.unwrap();
    assert_eq!(rebuilt, incremental);
    assert_eq!(rows.count().await, 1);
}

#[tokio::test]
async fn checkpoint_advances_and_bounds_reprocessing() {
    let store = InMemoryEventStore::new();
    let id = AggregateId::new();

    store
        .append(
            vec![profile_event(id, 1, "ProfileCreated", "A")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let projection = Arc::new(ProfileProjection::new());
    let rows = projection.rows.clone();
    let checkpoint_ref = Arc::clone(&projection.checkpoint);

    let mut manager = ProjectionManager::new(store.clone());
    manager.register(projection);
    manager.catch_up().await.unwrap();

    let first_checkpoint = checkpoint_ref.read().await.expect("checkpoint set");

    // New event appended later moves the checkpoint forward; the old
    // event is not reprocessed (updates stays consistent).
    store
        .append(
            vec![profile_event(id, 2, "ProfileRenamed", "B")],
            AppendOptions::expect_version(Version::first()),
        )
        .await
        .unwrap();
    manager.catch_up().await.unwrap();

    let second_checkpoint = checkpoint_ref.read().await.unwrap();
    assert!(second_checkpoint >= first_checkpoint);

    let row = rows.get(&id.to_string()).await.unwrap();
    assert_eq!(row.name, "B");
    assert_eq!(row.updates, 1);
}

#[tokio::test]
async fn multiple_aggregates_fan_into_separate_rows() {
    let store = InMemoryEventStore::new();
    let a = AggregateId::new();
    let b = AggregateId::new();

    store
        .append(
            vec![profile_event(a, 1, "ProfileCreated", "alpha")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    store
        .append(
            vec![profile_event(b, 1, "ProfileCreated", "beta")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let projection = Arc::new(ProfileProjection::new());
    let rows = projection.rows.clone();

    let mut manager = ProjectionManager::new(store);
    manager.register(projection);
    manager.catch_up().await.unwrap();

    assert_eq!(rows.count().await, 2);
    assert_eq!(rows.get(&a.to_string()).await.unwrap().name, "alpha");
    assert_eq!(rows.get(&b.to_string()).await.unwrap().name, "beta");
}
