//! Outbox processor: partitioned worker pool delivering pending events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use common::RetryPolicy;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::Result;
use crate::broker::{BrokerMessage, MessageBroker};
use crate::event::OutboxEvent;
use crate::partition::Partitioner;
use crate::repository::OutboxRepository;

/// Configuration for the outbox processor.
#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    /// Number of delivery workers. Each worker owns the partitions
    /// congruent to its index, so per-partition ordering is preserved.
    pub worker_count: usize,

    /// Maximum events claimed per partition per poll.
    pub batch_size: usize,

    /// Upper bound on the cumulative payload bytes handed to one
    /// `publish_batch` call; oversized claims are published in chunks.
    pub batch_max_bytes: Option<usize>,

    /// How often each worker polls its partitions. Also the effective
    /// batch timeout: a partial batch waits at most one interval.
    pub poll_interval: Duration,

    /// Backoff policy applied between failed publish attempts.
    pub retry_policy: RetryPolicy,

    /// Route exhausted events to the dead-letter topic instead of Failed.
    pub enable_dead_letter_queue: bool,

    /// Topic receiving dead-lettered events.
    pub dead_letter_topic: String,

    /// How long completed events are kept before cleanup deletes them.
    pub retention: Duration,

    /// How often the cleanup loop runs.
    pub cleanup_interval: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            batch_size: 50,
            batch_max_bytes: None,
            poll_interval: Duration::from_millis(200),
            retry_policy: RetryPolicy::default(),
            enable_dead_letter_queue: true,
            dead_letter_topic: "outbox.dead-letter".to_string(),
            retention: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Delivers pending outbox events to the broker.
///
/// `start` spawns the delivery workers and a cleanup loop; `stop` signals
/// them and joins every task. A worker that is mid-batch finishes the
/// batch before exiting, so shutdown never drops claimed work.
pub struct OutboxProcessor<R, B>
where
    R: OutboxRepository + 'static,
    B: MessageBroker + 'static,
{
    repository: Arc<R>,
    broker: Arc<B>,
    partitioner: Arc<Partitioner>,
    config: OutboxProcessorConfig,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<R, B> OutboxProcessor<R, B>
where
    R: OutboxRepository + 'static,
    B: MessageBroker + 'static,
{
    /// Creates a processor over the given repository and broker.
    pub fn new(
        repository: R,
        broker: B,
        partitioner: Partitioner,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            repository: Arc::new(repository),
            broker: Arc::new(broker),
            partitioner: Arc::new(partitioner),
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Returns a reference to the repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Assigns a partition to the event and stores it as pending.
    ///
    /// When the repository is database-backed and atomicity with a
    /// business write is required, assign the partition with
    /// [`Partitioner::assign`] and use `enqueue_in_tx` on the repository
    /// inside the caller's transaction instead.
    pub async fn enqueue(&self, mut event: OutboxEvent) -> Result<()> {
        self.partitioner.assign(&mut event);
        metrics::counter!("outbox_events_enqueued").increment(1);
        self.repository.enqueue(event).await
    }

    /// Spawns the delivery workers and the cleanup loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let worker_count = self.config.worker_count.max(1);
        let partition_count = self.partitioner.partition_count();
        let mut workers = self.workers.lock().await;

        for worker_index in 0..worker_count {
            let owned: Vec<u32> = (0..partition_count)
                .filter(|p| (*p as usize) % worker_count == worker_index)
                .collect();
            if owned.is_empty() {
                continue;
            }

            let repository = Arc::clone(&self.repository);
            let broker = Arc::clone(&self.broker);
            let config = self.config.clone();
            let running = Arc::clone(&self.running);
            let shutdown = Arc::clone(&self.shutdown);

            let handle = tokio::spawn(async move {
                tracing::info!(worker = worker_index, partitions = ?owned, "outbox worker started");
                while running.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = tokio::time::sleep(config.poll_interval) => {
                            for partition in &owned {
                                if let Err(e) = process_partition(
                                    repository.as_ref(),
                                    broker.as_ref(),
                                    &config,
                                    Some(*partition),
                                )
                                .await
                                {
                                    tracing::warn!(
                                        partition,
                                        error = %e,
                                        "outbox partition poll failed"
                                    );
                                }
                            }
                        }
                        _ = shutdown.notified() => break,
                    }
                }
                tracing::info!(worker = worker_index, "outbox worker stopped");
            });
            workers.push(handle);
        }

        // Retention cleanup and periodic statistics.
        let repository = Arc::clone(&self.repository);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        workers.push(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(config.cleanup_interval) => {
                        run_cleanup(repository.as_ref(), &config).await;
                    }
                    _ = shutdown.notified() => break,
                }
            }
        }));
    }

    /// Stops all workers, waiting for in-flight batches to finish.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }

    /// Processes every partition once, returning the number of events
    /// delivered or settled. Used at startup drains and in tests.
    pub async fn run_once(&self) -> Result<usize> {
        let mut settled = 0;
        for partition in 0..self.partitioner.partition_count() {
            settled += process_partition(
                self.repository.as_ref(),
                self.broker.as_ref(),
                &self.config,
                Some(partition),
            )
            .await?;
        }
        Ok(settled)
    }
}

/// Claims one batch from a partition and publishes it; every claimed
/// event ends the call as Completed, Pending-with-backoff, DeadLetter, or
/// Failed. Returns the number of events settled.
async fn process_partition<R, B>(
    repository: &R,
    broker: &B,
    config: &OutboxProcessorConfig,
    partition: Option<u32>,
) -> Result<usize>
where
    R: OutboxRepository,
    B: MessageBroker,
{
    let batch = repository.claim_batch(partition, config.batch_size).await?;
    if batch.is_empty() {
        return Ok(0);
    }

    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(batch.len());
    for chunk in chunk_by_bytes(&batch, config.batch_max_bytes) {
        let messages: Vec<BrokerMessage> = chunk.iter().map(|e| broker_message(e)).collect();
        match broker.publish_batch(messages).await {
            Ok(chunk_outcomes) => outcomes.extend(chunk_outcomes),
            // Transport-level failure: nobody in this chunk got published.
            Err(e) => {
                tracing::warn!(error = %e, "outbox batch publish failed");
                outcomes.extend(std::iter::repeat_n(false, chunk.len()));
            }
        }
    }
    let elapsed_ms = started.elapsed().as_millis() as i64;

    let mut settled = 0;
    for (event, delivered) in batch.iter().zip(outcomes.into_iter().chain(std::iter::repeat(false)))
    {
        if delivered {
            repository.mark_completed(event.event_id, elapsed_ms).await?;
            metrics::counter!("outbox_events_published").increment(1);
            metrics::histogram!("outbox_publish_duration_seconds")
                .record(elapsed_ms as f64 / 1000.0);
        } else {
            handle_failure(repository, broker, config, event).await?;
        }
        settled += 1;
    }

    Ok(settled)
}

/// Splits a claimed batch into chunks whose cumulative payload size stays
/// under `max_bytes`. A single oversized event still ships alone.
fn chunk_by_bytes(batch: &[OutboxEvent], max_bytes: Option<usize>) -> Vec<&[OutboxEvent]> {
    let Some(max_bytes) = max_bytes else {
        return vec![batch];
    };

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut bytes = 0;
    for (i, event) in batch.iter().enumerate() {
        let size = event.payload.to_string().len();
        if i > start && bytes + size > max_bytes {
            chunks.push(&batch[start..i]);
            start = i;
            bytes = 0;
        }
        bytes += size;
    }
    if start < batch.len() {
        chunks.push(&batch[start..]);
    }
    chunks
}

fn broker_message(event: &OutboxEvent) -> BrokerMessage {
    let mut message = BrokerMessage::new(event.topic.clone(), event.payload.clone())
        .with_key(event.aggregate_id.to_string())
        .with_partition(event.partition)
        .with_header("event-id", event.event_id.to_string())
        .with_header("event-type", event.event_type.clone());
    for (key, value) in &event.headers {
        message = message.with_header(key.clone(), value.clone());
    }
    if let Some(correlation_id) = event.correlation_id {
        message = message.with_header("correlation-id", correlation_id.to_string());
    }
    message
}

async fn handle_failure<R, B>(
    repository: &R,
    broker: &B,
    config: &OutboxProcessorConfig,
    event: &OutboxEvent,
) -> Result<()>
where
    R: OutboxRepository,
    B: MessageBroker,
{
    let error = "broker rejected publish";
    let attempts_made = event.attempt_count + 1;

    if attempts_made < event.max_attempts {
        let delay = config.retry_policy.delay_for_attempt(event.attempt_count);
        let next_retry_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        tracing::debug!(
            event_id = %event.event_id,
            attempt = attempts_made,
            next_retry_in_ms = delay.as_millis() as u64,
            "outbox publish failed, will retry"
        );
        repository
            .mark_retry(event.event_id, error, next_retry_at)
            .await?;
        return Ok(());
    }

    if config.enable_dead_letter_queue {
        // Best-effort copy to the dead-letter topic; the terminal state is
        // recorded regardless so the event is never retried again.
        let dlq_message = BrokerMessage::new(config.dead_letter_topic.clone(), event.payload.clone())
            .with_key(event.aggregate_id.to_string())
            .with_header("event-id", event.event_id.to_string())
            .with_header("original-topic", event.topic.clone());
        if let Err(e) = broker.publish(dlq_message).await {
            tracing::warn!(event_id = %event.event_id, error = %e, "dead-letter publish failed");
        }
        repository.mark_dead_letter(event.event_id, error).await?;
        metrics::counter!("outbox_events_dead_lettered").increment(1);
        tracing::warn!(event_id = %event.event_id, "outbox event dead-lettered");
    } else {
        repository.mark_failed(event.event_id, error).await?;
        metrics::counter!("outbox_events_failed").increment(1);
        tracing::warn!(event_id = %event.event_id, "outbox event failed terminally");
    }

    Ok(())
}

async fn run_cleanup<R: OutboxRepository>(repository: &R, config: &OutboxProcessorConfig) {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(config.retention).unwrap_or_else(|_| chrono::Duration::zero());

    match repository.delete_completed_before(cutoff).await {
        Ok(deleted) if deleted > 0 => {
            tracing::info!(deleted, "outbox retention cleanup");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "outbox cleanup failed"),
    }

    match repository.stats().await {
        Ok(stats) => {
            metrics::gauge!("outbox_pending_events").set(stats.pending as f64);
            metrics::gauge!("outbox_dead_letter_events").set(stats.dead_letter as f64);
            tracing::debug!(
                pending = stats.pending,
                processing = stats.processing,
                completed = stats.completed,
                failed = stats.failed,
                dead_letter = stats.dead_letter,
                skipped = stats.skipped,
                "outbox statistics"
            );
        }
        Err(e) => tracing::warn!(error = %e, "outbox stats failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::event::OutboxStatus;
    use crate::memory::InMemoryOutboxRepository;
    use crate::partition::PartitionStrategy;
    use common::AggregateId;

    fn processor(
        broker: InMemoryBroker,
        config: OutboxProcessorConfig,
    ) -> OutboxProcessor<InMemoryOutboxRepository, InMemoryBroker> {
        OutboxProcessor::new(
            InMemoryOutboxRepository::new(),
            broker,
            Partitioner::new(PartitionStrategy::AggregateId, 4),
            config,
        )
    }

    fn no_backoff() -> OutboxProcessorConfig {
        OutboxProcessorConfig {
            retry_policy: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                exponential_base: 2.0,
                jitter_factor: 0.0,
            },
            ..OutboxProcessorConfig::default()
        }
    }

    fn event(max_attempts: u32) -> OutboxEvent {
        OutboxEvent::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Order")
            .event_type("OrderPlaced")
            .topic("orders")
            .payload_raw(serde_json::json!({"n": 1}))
            .max_attempts(max_attempts)
            .build()
    }

    #[tokio::test]
    async fn successful_publish_completes_on_first_attempt() {
        let broker = InMemoryBroker::new();
        let processor = processor(broker.clone(), no_backoff());

        let e = event(3);
        let id = e.event_id;
        processor.enqueue(e).await.unwrap();

        let settled = processor.run_once().await.unwrap();
        assert_eq!(settled, 1);

        let stored = processor.repository().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Completed);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.processed_at.is_some());
        assert_eq!(broker.messages_for("orders").len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_with_dlq_dead_letters() {
        let broker = InMemoryBroker::new();
        broker.set_fail_topic("orders", true);
        let processor = processor(broker.clone(), no_backoff());

        let e = event(3);
        let id = e.event_id;
        processor.enqueue(e).await.unwrap();

        // Three failing attempts; backoff is zero so each run retries.
        for _ in 0..3 {
            processor.run_once().await.unwrap();
        }

        let stored = processor.repository().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::DeadLetter);
        assert_eq!(stored.attempt_count, 3);
        assert!(stored.last_error.is_some());
        assert_eq!(broker.messages_for("outbox.dead-letter").len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_without_dlq_fails() {
        let broker = InMemoryBroker::new();
        broker.set_fail_topic("orders", true);
        let mut config = no_backoff();
        config.enable_dead_letter_queue = false;
        let processor = processor(broker.clone(), config);

        let e = event(2);
        let id = e.event_id;
        processor.enqueue(e).await.unwrap();

        for _ in 0..2 {
            processor.run_once().await.unwrap();
        }

        let stored = processor.repository().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert!(broker.messages_for("outbox.dead-letter").is_empty());
    }

    #[tokio::test]
    async fn failed_attempt_returns_to_pending_with_backoff() {
        let broker = InMemoryBroker::new();
        broker.set_fail_topic("orders", true);
        let mut config = no_backoff();
        config.retry_policy.initial_delay = Duration::from_secs(60);
        config.retry_policy.max_delay = Duration::from_secs(60);
        let processor = processor(broker.clone(), config);

        let e = event(3);
        let id = e.event_id;
        processor.enqueue(e).await.unwrap();
        processor.run_once().await.unwrap();

        let stored = processor.repository().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.next_retry_at.is_some());

        // The backoff gate keeps it from being claimed again immediately.
        let settled = processor.run_once().await.unwrap();
        assert_eq!(settled, 0);
    }

    #[tokio::test]
    async fn recovery_after_transient_failure() {
        let broker = InMemoryBroker::new();
        broker.set_fail_topic("orders", true);
        let processor = processor(broker.clone(), no_backoff());

        let e = event(3);
        let id = e.event_id;
        processor.enqueue(e).await.unwrap();
        processor.run_once().await.unwrap();

        broker.set_fail_topic("orders", false);
        processor.run_once().await.unwrap();

        let stored = processor.repository().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Completed);
        assert_eq!(stored.attempt_count, 2);
    }

    #[test]
    fn chunking_respects_byte_budget() {
        let events: Vec<OutboxEvent> = (0..4).map(|_| event(3)).collect();
        let per_event = events[0].payload.to_string().len();

        // No budget: one chunk.
        assert_eq!(chunk_by_bytes(&events, None).len(), 1);

        // Budget for two events per chunk.
        let chunks = chunk_by_bytes(&events, Some(per_event * 2));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 2);

        // Budget below a single event: each ships alone.
        let chunks = chunk_by_bytes(&events, Some(1));
        assert_eq!(chunks.len(), 4);
    }

    #[tokio::test]
    async fn background_workers_deliver_and_drain_on_stop() {
        let broker = InMemoryBroker::new();
        let mut config = no_backoff();
        config.poll_interval = Duration::from_millis(10);
        let processor = processor(broker.clone(), config);

        processor.start().await;
        for _ in 0..5 {
            processor.enqueue(event(3)).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if broker.messages_for("orders").len() == 5 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("events were not delivered");

        processor.stop().await;

        let stats = processor.repository().stats().await.unwrap();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.pending, 0);
    }
}
