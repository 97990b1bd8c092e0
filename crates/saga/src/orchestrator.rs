//! Saga orchestrator: a worker pool executing sagas with compensation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::RetryPolicy;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::Result;
use crate::definition::{SagaDefinition, SagaStep};
use crate::error::SagaError;
use crate::handler::{HandlerRegistry, StepContext};
use crate::state::SagaState;
use crate::transaction::SagaTransaction;

/// Configuration for the saga orchestrator.
#[derive(Debug, Clone)]
pub struct SagaOrchestratorConfig {
    /// Number of workers pulling sagas off the shared queue. Steps within
    /// one saga run strictly sequentially; sagas run concurrently.
    pub worker_count: usize,

    /// Backoff between failed step attempts. The per-step `retry_count`
    /// bounds the attempts; this policy only shapes the delays.
    pub retry_policy: RetryPolicy,
}

impl Default for SagaOrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Executes sagas: forward through their steps, backward through their
/// compensations when a critical step fails.
///
/// All mutation of one saga happens under that saga's exclusive lock. A
/// non-critical step failure is logged and skipped; a critical one turns
/// the saga around — completed steps are compensated in strict reverse
/// order, and a compensation failure after retries leaves the saga
/// `Failed` (partially compensated, reported, never retried forever).
pub struct SagaOrchestrator {
    config: SagaOrchestratorConfig,
    registry: HandlerRegistry,
    sagas: Arc<RwLock<HashMap<Uuid, Arc<Mutex<SagaTransaction>>>>>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SagaOrchestrator {
    /// Creates an orchestrator using the given handler registry.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_config(registry, SagaOrchestratorConfig::default())
    }

    /// Creates an orchestrator with the given configuration.
    pub fn with_config(registry: HandlerRegistry, config: SagaOrchestratorConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            config,
            registry,
            sagas: Arc::new(RwLock::new(HashMap::new())),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Accepts a saga for execution and enqueues it for the worker pool.
    #[tracing::instrument(skip(self, definition, context), fields(saga = %definition.name))]
    pub async fn start_saga(
        &self,
        definition: Arc<SagaDefinition>,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<Uuid> {
        let saga = SagaTransaction::new(definition, context);
        let saga_id = saga.saga_id;

        self.sagas
            .write()
            .await
            .insert(saga_id, Arc::new(Mutex::new(saga)));

        self.queue_tx
            .send(saga_id)
            .map_err(|_| SagaError::NotRunning)?;

        metrics::counter!("saga_executions_total").increment(1);
        tracing::info!(%saga_id, "saga accepted");
        Ok(saga_id)
    }

    /// Spawns the worker pool.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock().await;
        for worker_index in 0..self.config.worker_count.max(1) {
            let registry = self.registry.clone();
            let config = self.config.clone();
            let sagas = Arc::clone(&self.sagas);
            let queue_rx = Arc::clone(&self.queue_rx);
            let running = Arc::clone(&self.running);
            let shutdown = Arc::clone(&self.shutdown);

            let handle = tokio::spawn(async move {
                tracing::debug!(worker = worker_index, "saga worker started");
                while running.load(Ordering::SeqCst) {
                    let next = {
                        tokio::select! {
                            _ = shutdown.notified() => break,
                            saga_id = async { queue_rx.lock().await.recv().await } => saga_id,
                        }
                    };

                    let Some(saga_id) = next else { break };
                    let entry = sagas.read().await.get(&saga_id).cloned();
                    if let Some(saga) = entry {
                        run_saga(&registry, &config, &saga).await;
                    }
                }
                tracing::debug!(worker = worker_index, "saga worker stopped");
            });
            workers.push(handle);
        }
    }

    /// Stops the worker pool; a saga mid-execution finishes first.
    /// Sagas still queued stay `Created` and resume on the next `start`.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }

    /// Returns a snapshot of a saga.
    pub async fn get_saga(&self, saga_id: Uuid) -> Result<SagaTransaction> {
        let sagas = self.sagas.read().await;
        let saga = sagas
            .get(&saga_id)
            .ok_or(SagaError::SagaNotFound(saga_id))?;
        Ok(saga.lock().await.clone())
    }

    /// Polls until the saga reaches a terminal state or the wait expires.
    pub async fn wait_for_completion(
        &self,
        saga_id: Uuid,
        wait: Duration,
    ) -> Result<SagaTransaction> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let saga = self.get_saga(saga_id).await?;
            if saga.state.is_terminal() {
                return Ok(saga);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(saga);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Runs one saga to a terminal state under its exclusive lock.
async fn run_saga(
    registry: &HandlerRegistry,
    config: &SagaOrchestratorConfig,
    saga: &Arc<Mutex<SagaTransaction>>,
) {
    let mut saga = saga.lock().await;
    if !saga.state.can_execute() {
        return;
    }

    let saga_id = saga.saga_id;
    let started = std::time::Instant::now();
    saga.transition(SagaState::Executing);
    tracing::info!(%saga_id, saga = %saga.definition.name, "saga executing");

    let definition = Arc::clone(&saga.definition);
    while saga.current_step < definition.len() {
        if let Some(budget) = definition.timeout
            && started.elapsed() > budget
        {
            saga.last_error = Some(format!(
                "saga exceeded its {}ms budget",
                budget.as_millis()
            ));
            saga.transition(SagaState::Compensating);
            tracing::warn!(%saga_id, "saga timed out, compensating");
            compensate(registry, config, &mut saga).await;
            metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
            return;
        }

        let step = &definition.steps[saga.current_step];
        let succeeded =
            run_handler(registry, config, &saga, step, &step.action, "step").await;

        if succeeded {
            saga.completed_steps.push(step.id);
            saga.current_step += 1;
        } else if !step.critical {
            tracing::warn!(%saga_id, step = %step.name, "non-critical step failed, skipping");
            saga.skipped_steps.push(step.id);
            saga.current_step += 1;
        } else {
            saga.last_error = Some(format!("critical step {:?} failed", step.name));
            saga.transition(SagaState::Compensating);
            tracing::warn!(%saga_id, step = %step.name, "critical step failed, compensating");
            compensate(registry, config, &mut saga).await;
            metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
            return;
        }
    }

    saga.transition(SagaState::Completed);
    metrics::counter!("saga_completed").increment(1);
    metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
    tracing::info!(%saga_id, "saga completed");
}

/// Compensates completed steps in strict reverse order.
async fn compensate(
    registry: &HandlerRegistry,
    config: &SagaOrchestratorConfig,
    saga: &mut SagaTransaction,
) {
    let definition = Arc::clone(&saga.definition);

    for step_id in saga.completed_steps.clone().into_iter().rev() {
        let Some(step) = definition.step(step_id) else {
            continue;
        };

        let compensated = match &step.compensation {
            Some(name) => run_handler(registry, config, saga, step, name, "compensation").await,
            // A completed step without a compensation has nothing to undo.
            None => true,
        };

        if compensated {
            saga.compensated_steps.push(step_id);
        } else {
            saga.last_error = Some(format!("compensation for step {:?} failed", step.name));
            saga.transition(SagaState::Failed);
            metrics::counter!("saga_failed").increment(1);
            tracing::error!(
                saga_id = %saga.saga_id,
                step = %step.name,
                "compensation failed, saga partially compensated"
            );
            return;
        }
    }

    saga.transition(SagaState::Compensated);
    metrics::counter!("saga_compensated").increment(1);
    tracing::info!(saga_id = %saga.saga_id, "saga compensated");
}

/// Invokes a named handler with the step's timeout, retrying up to the
/// step's retry count with the configured backoff. Returns the final
/// outcome; a missing handler registration counts as failure.
async fn run_handler(
    registry: &HandlerRegistry,
    config: &SagaOrchestratorConfig,
    saga: &SagaTransaction,
    step: &SagaStep,
    handler_name: &str,
    kind: &'static str,
) -> bool {
    let Some(handler) = registry.get(handler_name) else {
        tracing::error!(
            saga_id = %saga.saga_id,
            step = %step.name,
            handler = handler_name,
            "no handler registered"
        );
        return false;
    };

    for attempt in 0..=step.retry_count {
        if attempt > 0 {
            let delay = config.retry_policy.delay_for_attempt(attempt - 1);
            tokio::time::sleep(delay).await;
        }

        let ctx = StepContext {
            saga_id: saga.saga_id,
            step_id: step.id,
            step_name: step.name.clone(),
            params: step.params.clone(),
            saga_context: saga.context.clone(),
        };

        match tokio::time::timeout(step.timeout, handler(ctx)).await {
            Ok(true) => return true,
            Ok(false) => {
                tracing::debug!(
                    saga_id = %saga.saga_id,
                    step = %step.name,
                    kind,
                    attempt,
                    "handler reported failure"
                );
            }
            Err(_) => {
                tracing::warn!(
                    saga_id = %saga.saga_id,
                    step = %step.name,
                    kind,
                    attempt,
                    timeout_ms = step.timeout.as_millis() as u64,
                    "handler timed out"
                );
            }
        }
    }

    false
}
