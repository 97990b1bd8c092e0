use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreExt, InMemoryEventStore, Version,
};

fn make_event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Account")
        .event_type("FundsDeposited")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({
            "account_id": aggregate_id.to_string(),
            "amount": 125,
        }))
        .build()
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let agg_id = AggregateId::new();
                store
                    .append(vec![make_event(agg_id, 1)], AppendOptions::any())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let agg_id = AggregateId::new();
                let events: Vec<EventEnvelope> = (1..=10).map(|v| make_event(agg_id, v)).collect();
                store.append(events, AppendOptions::any()).await.unwrap();
            });
        });
    });
}

fn bench_append_with_version_check(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_with_version_check", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let agg_id = AggregateId::new();
                store
                    .append(vec![make_event(agg_id, 1)], AppendOptions::expect_new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_events_for_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    // Pre-populate with 100 events
    rt.block_on(async {
        let events: Vec<EventEnvelope> = (1..=100).map(|v| make_event(agg_id, v)).collect();
        store.append(events, AppendOptions::any()).await.unwrap();
    });

    c.bench_function("event_store/events_for_aggregate_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.events_for_aggregate(agg_id).await.unwrap();
            });
        });
    });
}

fn bench_events_from_version(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    rt.block_on(async {
        let events: Vec<EventEnvelope> = (1..=100).map(|v| make_event(agg_id, v)).collect();
        store.append(events, AppendOptions::any()).await.unwrap();
    });

    c.bench_function("event_store/events_from_version_50", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .events_from_version(agg_id, Version::new(50))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_stream_all_events(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    // Pre-populate with 1000 events across 10 aggregates
    rt.block_on(async {
        for _ in 0..10 {
            let agg_id = AggregateId::new();
            let events: Vec<EventEnvelope> = (1..=100).map(|v| make_event(agg_id, v)).collect();
            store.append(events, AppendOptions::any()).await.unwrap();
        }
    });

    c.bench_function("event_store/stream_1000_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store.stream_all_events().await.unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

fn bench_load_aggregate_with_snapshot(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    rt.block_on(async {
        let events: Vec<EventEnvelope> = (1..=100).map(|v| make_event(agg_id, v)).collect();
        store.append(events, AppendOptions::any()).await.unwrap();
        store
            .save_snapshot(event_store::Snapshot::new(
                agg_id,
                "Account",
                Version::new(90),
                serde_json::json!({"balance": 90}),
            ))
            .await
            .unwrap();
    });

    c.bench_function("event_store/load_aggregate_snapshot_plus_tail", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (snapshot, tail) = store.load_aggregate(agg_id).await.unwrap();
                assert!(snapshot.is_some());
                assert_eq!(tail.len(), 10);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_batch_10,
    bench_append_with_version_check,
    bench_events_for_aggregate,
    bench_events_from_version,
    bench_stream_all_events,
    bench_load_aggregate_with_snapshot,
);
criterion_main!(benches);
