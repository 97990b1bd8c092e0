//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use event_store::{
    AggregateId, AppendOptions, EventEnvelope, EventQuery, EventStore, EventStoreError,
    EventStoreExt, PostgresEventStore, Snapshot, Version,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!("../../../migrations/0001_create_events.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query("TRUNCATE TABLE events, snapshots")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn create_test_event(
    aggregate_id: AggregateId,
    version: Version,
    event_type: &str,
) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Account")
        .event_type(event_type)
        .version(version)
        .payload_raw(serde_json::json!({"test": true}))
        .build()
}

#[tokio::test]
async fn append_and_retrieve_events() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let event = create_test_event(aggregate_id, Version::first(), "AccountOpened");
    let version = store
        .append(vec![event], AppendOptions::expect_new())
        .await
        .unwrap();
    assert_eq!(version, Version::first());

    let events = store.events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "AccountOpened");
    assert_eq!(events[0].version, Version::first());
}

#[tokio::test]
async fn append_batch_atomically() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let events = vec![
        create_test_event(aggregate_id, Version::new(1), "E1"),
        create_test_event(aggregate_id, Version::new(2), "E2"),
        create_test_event(aggregate_id, Version::new(3), "E3"),
    ];

    let version = store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();
    assert_eq!(version, Version::new(3));

    let events = store.events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn concurrency_conflict_stores_nothing() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            vec![create_test_event(
                aggregate_id,
                Version::first(),
                "AccountOpened",
            )],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    // Repeat with the same expected version: the stream moved on.
    let result = store
        .append(
            vec![create_test_event(
                aggregate_id,
                Version::first(),
                "AccountOpened",
            )],
            AppendOptions::expect_new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));

    let events = store.events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn unique_constraint_backstops_racing_writers() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(
            vec![create_test_event(aggregate_id, Version::first(), "E1")],
            AppendOptions::any(),
        )
        .await
        .unwrap();

    // No version check, but the (aggregate_id, version) constraint fires.
    let result = store
        .append(
            vec![create_test_event(aggregate_id, Version::first(), "E1")],
            AppendOptions::any(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
async fn events_from_version_returns_tail() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let events = vec![
        create_test_event(aggregate_id, Version::new(1), "E1"),
        create_test_event(aggregate_id, Version::new(2), "E2"),
        create_test_event(aggregate_id, Version::new(3), "E3"),
    ];
    store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();

    let tail = store
        .events_from_version(aggregate_id, Version::new(2))
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].version, Version::new(2));
}

#[tokio::test]
async fn query_by_event_type() {
    let store = get_test_store().await;
    let id1 = AggregateId::new();
    let id2 = AggregateId::new();

    store
        .append(
            vec![create_test_event(id1, Version::first(), "AccountOpened")],
            AppendOptions::any(),
        )
        .await
        .unwrap();
    store
        .append(
            vec![create_test_event(id2, Version::first(), "AccountClosed")],
            AppendOptions::any(),
        )
        .await
        .unwrap();

    let opened = store
        .query_events(EventQuery::new().event_type("AccountOpened"))
        .await
        .unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].aggregate_id, id1);
}

#[tokio::test]
async fn correlation_and_causation_roundtrip() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();
    let correlation = common::CorrelationId::new();

    let cause = create_test_event(aggregate_id, Version::first(), "AccountOpened");
    let cause_id = cause.event_id;
    store
        .append(vec![cause], AppendOptions::expect_new())
        .await
        .unwrap();

    let effect = EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Account")
        .event_type("FundsDeposited")
        .version(Version::new(2))
        .correlation_id(correlation)
        .causation_id(cause_id)
        .payload_raw(serde_json::json!({"amount": 5}))
        .build();
    store
        .append(vec![effect], AppendOptions::expect_version(Version::first()))
        .await
        .unwrap();

    let events = store.events_for_aggregate(aggregate_id).await.unwrap();
    assert_eq!(events[1].correlation_id, Some(correlation));
    assert_eq!(events[1].causation_id, Some(cause_id));
}

#[tokio::test]
async fn snapshot_upsert_and_load_aggregate() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let events = vec![
        create_test_event(aggregate_id, Version::new(1), "E1"),
        create_test_event(aggregate_id, Version::new(2), "E2"),
        create_test_event(aggregate_id, Version::new(3), "E3"),
    ];
    store
        .append(events, AppendOptions::expect_new())
        .await
        .unwrap();

    store
        .save_snapshot(Snapshot::new(
            aggregate_id,
            "Account",
            Version::new(2),
            serde_json::json!({"balance": 2}),
        ))
        .await
        .unwrap();

    // Replacing the snapshot keeps one row per aggregate.
    store
        .save_snapshot(Snapshot::new(
            aggregate_id,
            "Account",
            Version::new(3),
            serde_json::json!({"balance": 3}),
        ))
        .await
        .unwrap();

    let (snapshot, tail) = store.load_aggregate(aggregate_id).await.unwrap();
    assert_eq!(snapshot.unwrap().version, Version::new(3));
    assert!(tail.is_empty());
}

#[tokio::test]
async fn current_version_reflects_stream() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    assert!(store.current_version(aggregate_id).await.unwrap().is_none());

    store
        .append(
            vec![
                create_test_event(aggregate_id, Version::new(1), "E1"),
                create_test_event(aggregate_id, Version::new(2), "E2"),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    assert_eq!(
        store.current_version(aggregate_id).await.unwrap(),
        Some(Version::new(2))
    );
}
