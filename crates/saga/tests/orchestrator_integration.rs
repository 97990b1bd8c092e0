//! End-to-end saga scenarios against the orchestrator worker pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::RetryPolicy;
use saga::{
    HandlerRegistry, SagaDefinition, SagaOrchestrator, SagaOrchestratorConfig, SagaState, SagaStep,
    StepContext,
};

fn config() -> SagaOrchestratorConfig {
    SagaOrchestratorConfig {
        worker_count: 2,
        retry_policy: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            exponential_base: 2.0,
            jitter_factor: 0.0,
        },
    }
}

fn critical_step(name: &str, action: &str, compensation: &str) -> SagaStep {
    SagaStep::builder(name)
        .service("test")
        .action(action)
        .compensation(compensation)
        .timeout(Duration::from_millis(500))
        .retry_count(0)
        .build()
        .unwrap()
}

/// Records every handler invocation in order.
#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn logging_handler(
    log: &CallLog,
    name: &'static str,
    outcome: bool,
) -> impl Fn(StepContext) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>
+ Send
+ Sync
+ 'static {
    let log = log.clone();
    move |_ctx| {
        let log = log.clone();
        Box::pin(async move {
            log.record(name);
            outcome
        })
    }
}

#[tokio::test]
async fn failing_middle_step_compensates_only_completed_work() {
    // Saga [A(critical), B(critical), C(critical)], B always fails:
    // A runs and is compensated, C is never attempted.
    let log = CallLog::default();
    let registry = HandlerRegistry::new();
    registry.register("do_a", logging_handler(&log, "do_a", true));
    registry.register("undo_a", logging_handler(&log, "undo_a", true));
    registry.register("do_b", logging_handler(&log, "do_b", false));
    registry.register("undo_b", logging_handler(&log, "undo_b", true));
    registry.register("do_c", logging_handler(&log, "do_c", true));
    registry.register("undo_c", logging_handler(&log, "undo_c", true));

    let definition = Arc::new(
        SagaDefinition::builder("three_critical_steps")
            .step(critical_step("a", "do_a", "undo_a"))
            .step(critical_step("b", "do_b", "undo_b"))
            .step(critical_step("c", "do_c", "undo_c"))
            .build()
            .unwrap(),
    );

    let orchestrator = SagaOrchestrator::with_config(registry, config());
    orchestrator.start().await;
    let saga_id = orchestrator
        .start_saga(Arc::clone(&definition), HashMap::new())
        .await
        .unwrap();
    let saga = orchestrator
        .wait_for_completion(saga_id, Duration::from_secs(5))
        .await
        .unwrap();
    orchestrator.stop().await;

    assert_eq!(saga.state, SagaState::Compensated);
    assert_eq!(saga.completed_steps, vec![definition.steps[0].id]);
    assert_eq!(saga.compensated_steps, vec![definition.steps[0].id]);
    assert_eq!(log.entries(), vec!["do_a", "do_b", "undo_a"]);
}

#[tokio::test]
async fn conservation_holds_at_every_terminal_state() {
    let registry = HandlerRegistry::new();
    registry.register("ok", |_| async { true });
    registry.register("undo", |_| async { true });
    registry.register("fail", |_| async { false });

    // Completed saga: completed + remaining == total.
    let completed_def = Arc::new(
        SagaDefinition::builder("completes")
            .step(critical_step("a", "ok", "undo"))
            .step(critical_step("b", "ok", "undo"))
            .build()
            .unwrap(),
    );

    // Compensated saga: compensated is the exact reverse of completed.
    let compensated_def = Arc::new(
        SagaDefinition::builder("compensates")
            .step(critical_step("a", "ok", "undo"))
            .step(critical_step("b", "ok", "undo"))
            .step(critical_step("c", "fail", "undo"))
            .build()
            .unwrap(),
    );

    let orchestrator = SagaOrchestrator::with_config(registry, config());
    orchestrator.start().await;

    let completed_id = orchestrator
        .start_saga(Arc::clone(&completed_def), HashMap::new())
        .await
        .unwrap();
    let compensated_id = orchestrator
        .start_saga(Arc::clone(&compensated_def), HashMap::new())
        .await
        .unwrap();

    let completed = orchestrator
        .wait_for_completion(completed_id, Duration::from_secs(5))
        .await
        .unwrap();
    let compensated = orchestrator
        .wait_for_completion(compensated_id, Duration::from_secs(5))
        .await
        .unwrap();
    orchestrator.stop().await;

    assert_eq!(completed.state, SagaState::Completed);
    assert_eq!(
        completed.completed_steps.len() + completed.remaining(),
        completed.definition.len()
    );

    assert_eq!(compensated.state, SagaState::Compensated);
    let mut reversed = compensated.completed_steps.clone();
    reversed.reverse();
    assert_eq!(compensated.compensated_steps, reversed);
}

#[tokio::test]
async fn non_critical_failure_never_triggers_compensation() {
    let log = CallLog::default();
    let registry = HandlerRegistry::new();
    registry.register("do_a", logging_handler(&log, "do_a", true));
    registry.register("undo_a", logging_handler(&log, "undo_a", true));
    registry.register("flaky_metrics", logging_handler(&log, "flaky_metrics", false));
    registry.register("do_c", logging_handler(&log, "do_c", true));
    registry.register("undo_c", logging_handler(&log, "undo_c", true));

    let definition = Arc::new(
        SagaDefinition::builder("with_optional_step")
            .step(critical_step("a", "do_a", "undo_a"))
            .step(
                SagaStep::builder("metrics")
                    .service("telemetry")
                    .action("flaky_metrics")
                    .critical(false)
                    .retry_count(1)
                    .timeout(Duration::from_millis(500))
                    .build()
                    .unwrap(),
            )
            .step(critical_step("c", "do_c", "undo_c"))
            .build()
            .unwrap(),
    );

    let orchestrator = SagaOrchestrator::with_config(registry, config());
    orchestrator.start().await;
    let saga_id = orchestrator
        .start_saga(Arc::clone(&definition), HashMap::new())
        .await
        .unwrap();
    let saga = orchestrator
        .wait_for_completion(saga_id, Duration::from_secs(5))
        .await
        .unwrap();
    orchestrator.stop().await;

    assert_eq!(saga.state, SagaState::Completed);
    assert!(saga.compensated_steps.is_empty());
    assert_eq!(saga.skipped_steps, vec![definition.steps[1].id]);
    // The non-critical step was retried once, then skipped; no undo ran.
    assert_eq!(
        log.entries(),
        vec!["do_a", "flaky_metrics", "flaky_metrics", "do_c"]
    );
}

#[tokio::test]
async fn saga_context_flows_to_handlers() {
    let seen = Arc::new(Mutex::new(None));
    let registry = HandlerRegistry::new();
    let sink = Arc::clone(&seen);
    registry.register("capture", move |ctx: StepContext| {
        let sink = Arc::clone(&sink);
        async move {
            *sink.lock().unwrap() = Some((
                ctx.saga_context.get("order_id").cloned(),
                ctx.params.clone(),
                ctx.step_name.clone(),
            ));
            true
        }
    });
    registry.register("undo_capture", |_| async { true });

    let definition = Arc::new(
        SagaDefinition::builder("contextual")
            .step(
                SagaStep::builder("capture")
                    .action("capture")
                    .compensation("undo_capture")
                    .params(serde_json::json!({"sku": "A-1"}))
                    .timeout(Duration::from_millis(500))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap(),
    );

    let mut context = HashMap::new();
    context.insert("order_id".to_string(), serde_json::json!("ord-42"));

    let orchestrator = SagaOrchestrator::with_config(registry, config());
    orchestrator.start().await;
    let saga_id = orchestrator.start_saga(definition, context).await.unwrap();
    let saga = orchestrator
        .wait_for_completion(saga_id, Duration::from_secs(5))
        .await
        .unwrap();
    orchestrator.stop().await;

    assert_eq!(saga.state, SagaState::Completed);
    let (order_id, params, step_name) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(order_id, Some(serde_json::json!("ord-42")));
    assert_eq!(params, serde_json::json!({"sku": "A-1"}));
    assert_eq!(step_name, "capture");
}
