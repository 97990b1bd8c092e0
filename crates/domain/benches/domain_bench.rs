use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Aggregate, AggregateRoot, DomainEvent, Repository};
use event_store::InMemoryEventStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum CounterEvent {
    Opened { id: AggregateId },
    Incremented { by: i64 },
}

impl DomainEvent for CounterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CounterEvent::Opened { .. } => "CounterOpened",
            CounterEvent::Incremented { .. } => "CounterIncremented",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Counter {
    id: Option<AggregateId>,
    total: i64,
}

#[derive(Debug, thiserror::Error)]
#[error("counter error")]
struct CounterError;

impl Aggregate for Counter {
    type Event = CounterEvent;
    type Error = CounterError;

    fn aggregate_type() -> &'static str {
        "Counter"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CounterEvent::Opened { id } => self.id = Some(id),
            CounterEvent::Incremented { by } => self.total += by,
        }
    }
}

fn bench_apply_1000_events(c: &mut Criterion) {
    let id = AggregateId::new();

    c.bench_function("domain/apply_1000_events", |b| {
        b.iter(|| {
            let mut counter = Counter::default();
            counter.apply(CounterEvent::Opened { id });
            for _ in 0..999 {
                counter.apply(CounterEvent::Incremented { by: 1 });
            }
            assert_eq!(counter.total, 999);
        });
    });
}

fn bench_save_10_events(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/save_10_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let repo: Repository<_, Counter> = Repository::new(InMemoryEventStore::new());
                let id = AggregateId::new();
                let mut root = AggregateRoot::new();
                root.raise(CounterEvent::Opened { id });
                for _ in 0..9 {
                    root.raise(CounterEvent::Incremented { by: 1 });
                }
                repo.save(id, &mut root).await.unwrap();
            });
        });
    });
}

fn bench_load_100_event_history(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let repo: Repository<_, Counter> = Repository::new(store);
    let id = AggregateId::new();

    rt.block_on(async {
        let mut root = AggregateRoot::new();
        root.raise(CounterEvent::Opened { id });
        for _ in 0..99 {
            root.raise(CounterEvent::Incremented { by: 1 });
        }
        repo.save(id, &mut root).await.unwrap();
    });

    c.bench_function("domain/load_100_event_history", |b| {
        b.iter(|| {
            rt.block_on(async {
                let root = repo.load(id).await.unwrap();
                assert_eq!(root.state().total, 99);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_apply_1000_events,
    bench_save_10_events,
    bench_load_100_event_history,
);
criterion_main!(benches);
