//! Literal end-to-end scenarios from `spec.md` §8, driven against an
//! in-memory `Storage` and `DemoProvider`-backed router, in the style of
//! the teacher's integration tests: build the whole collaborator graph,
//! submit a build, and assert on the observable outcome rather than on
//! internal state.

mod common;

use std::sync::Arc;
use std::time::Duration;

use buildforge::event_fabric::{AllowAll, EventFabric, EventKind};
use buildforge::orchestrator::{Orchestrator, OrchestratorConfig};
use buildforge::registry::StageRegistry;
use buildforge::router::{DemoProvider, ModelRouter, RouterConfig};
use buildforge::stage::builtin_handlers;
use buildforge::storage::{InMemoryStorage, Storage};
use buildforge::types::{BuildStatus, StageId, StageStatus};
use common::{test_orchestrator, test_orchestrator_with_handler, FailNTimesHandler, SlowMultiEventHandler};

/// Scenario 1: happy path. Every built-in stage succeeds first try.
#[tokio::test]
async fn happy_path_completes_every_stage_in_order() {
    let orchestrator = test_orchestrator().await;
    let fabric = Arc::clone(orchestrator.fabric());
    let (_backlog, mut events) = fabric.subscribe("b-1", "any", &AllowAll, true).await.unwrap();

    let spec = serde_json::json!({"projectName": "Demo", "features": {"auth": true}});
    let build = orchestrator.submit("b-1", "p-1", "u-1", spec).await.unwrap();
    orchestrator.join(&build.id).await;

    let final_build = orchestrator.storage().load_build("b-1").await.unwrap().unwrap();
    assert_eq!(final_build.status, BuildStatus::Completed);
    assert_eq!(final_build.progress, 100);
    assert!(final_build.stages.iter().all(|s| s.status.is_success_terminal()));

    // Dependency order: every stage's dependencies appear before it and are
    // already terminal-success by the time it finishes.
    let registry = orchestrator.registry();
    for stage in &final_build.stages {
        for dep in registry.dependencies(&stage.stage_id) {
            let dep_stage = final_build.stage(&dep).expect("dependency ran");
            assert!(dep_stage.status.is_success_terminal(), "{} must finish before {}", dep, stage.stage_id);
        }
    }

    // Exactly one terminal `pipeline_complete` event reaches the subscriber.
    let mut pipeline_completions = 0;
    loop {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(event)) if event.kind == EventKind::PipelineComplete => pipeline_completions += 1,
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert_eq!(pipeline_completions, 1);
}

/// Scenario 2 (orchestrator-level retry): a stage fails twice, then
/// succeeds on the third attempt. `attemptCount` bound, eventual DONE, and
/// the `retrying`/`retry-success` events and non-final stage-error log
/// entries `spec.md` §4.3 step 4 and §8 invariant 3 require.
#[tokio::test]
async fn transient_stage_failure_then_success_completes_the_build() {
    let handler = Arc::new(FailNTimesHandler::new(2));
    let orchestrator = test_orchestrator_with_handler("coding_file", handler).await;
    let fabric = Arc::clone(orchestrator.fabric());
    let (_backlog, mut events) = fabric.subscribe("b-2", "any", &AllowAll, true).await.unwrap();

    let build = orchestrator
        .submit("b-2", "p-1", "u-1", serde_json::json!({"projectName": "Demo"}))
        .await
        .unwrap();
    orchestrator.join(&build.id).await;

    let final_build = orchestrator.storage().load_build("b-2").await.unwrap().unwrap();
    let coding = final_build.stage(&StageId::new("coding_file").unwrap()).unwrap();
    assert_eq!(coding.status, StageStatus::Done);
    assert_eq!(coding.attempt_count, 3);
    assert!(coding.attempt_count <= coding.max_attempts);
    assert_eq!(final_build.status, BuildStatus::Completed);

    // Exactly `attemptCount - 1` = 2 non-final stage-error log entries for
    // `coding_file`, none tagged `final_failure`.
    let coding_errors: Vec<_> = final_build
        .stage_errors
        .iter()
        .filter(|e| matches!(&e.scope, buildforge::errors::ErrorScope::Stage { stage_id, .. } if stage_id == "coding_file"))
        .collect();
    assert_eq!(coding_errors.len(), 2, "one stage-error log entry per retried attempt");
    assert!(coding_errors.iter().all(|e| !e.is_final_failure()));

    // Two `retrying` stage_update events and one `retry-success` summary
    // reach the subscriber.
    let mut retrying_count = 0;
    let mut retry_success_count = 0;
    loop {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(event)) if event.stage.as_deref() == Some("coding_file") => match event.status.as_deref() {
                Some("retrying") => retrying_count += 1,
                Some("retry-success") => retry_success_count += 1,
                _ => {}
            },
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert_eq!(retrying_count, 2);
    assert_eq!(retry_success_count, 1);
}

/// Scenario 3: a critical, retryable stage exhausts every attempt.
/// Downstream stages never run; the build fails.
#[tokio::test]
async fn critical_stage_exhausting_retries_fails_the_build() {
    // `creating_schema` is critical and retryable with the default 3-attempt
    // budget (`spec.md` §4.1); failing every attempt must fail the build.
    let handler = Arc::new(FailNTimesHandler::new(10));
    let orchestrator = test_orchestrator_with_handler("creating_schema", handler).await;

    let build = orchestrator
        .submit("b-3", "p-1", "u-1", serde_json::json!({"projectName": "Demo"}))
        .await
        .unwrap();
    orchestrator.join(&build.id).await;

    let final_build = orchestrator.storage().load_build("b-3").await.unwrap().unwrap();
    let schema = final_build.stage(&StageId::new("creating_schema").unwrap()).unwrap();
    assert_eq!(schema.status, StageStatus::Error);
    assert_eq!(final_build.status, BuildStatus::Failed);
    assert!(final_build.terminal_error.as_deref().unwrap_or("").contains("creating_schema"));

    // A stage that depends (directly or transitively) on the failed
    // critical stage never reached RUNNING.
    let registry = orchestrator.registry();
    for stage in &final_build.stages {
        if registry.dependencies(&stage.stage_id).contains(&StageId::new("creating_schema").unwrap()) {
            assert_eq!(stage.status, StageStatus::Pending, "{} must not have started", stage.stage_id);
        }
    }
}

/// Scenario 6: cancellation mid-stage. The cooperative flag is observed at
/// the next await boundary, the stage never completes further sub-events,
/// and the build reaches CANCELLED.
#[tokio::test]
async fn cancellation_mid_stage_halts_the_build() {
    let handler = Arc::new(SlowMultiEventHandler { total_events: 10, step_delay: Duration::from_millis(50) });
    let orchestrator = test_orchestrator_with_handler("creating_files", handler).await;

    let build = orchestrator
        .submit("b-6", "p-1", "u-1", serde_json::json!({"projectName": "Demo"}))
        .await
        .unwrap();

    // Let a few sub-events land, then cancel mid-stage.
    tokio::time::sleep(Duration::from_millis(160)).await;
    assert!(orchestrator.cancel(&build.id));
    orchestrator.join(&build.id).await;

    let final_build = orchestrator.storage().load_build("b-6").await.unwrap().unwrap();
    assert_eq!(final_build.status, BuildStatus::Cancelled);
    let files_stage = final_build.stage(&StageId::new("creating_files").unwrap()).unwrap();
    assert_eq!(files_stage.status, StageStatus::Cancelled);
    assert!(files_stage.events.len() < 10, "cancellation must cut the sub-event sequence short");
}

/// Boundary: `retries = 0` yields exactly one attempt and no retrying.
#[tokio::test]
async fn zero_retry_budget_is_one_attempt_and_final() {
    let handler = Arc::new(FailNTimesHandler::new(1));
    let registry = Arc::new(StageRegistry::with_builtins());
    let router = ModelRouter::new(RouterConfig::default());
    router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let fabric = EventFabric::new();
    let mut config = OrchestratorConfig::default();
    config.default_max_attempts = 1;
    let mut handlers = builtin_handlers();
    handlers.insert(StageId::new("coding_file").unwrap(), handler);
    let orchestrator: Arc<Orchestrator> = Orchestrator::with_handlers(registry, router, storage, fabric, config, handlers);

    let build = orchestrator.submit("b-z", "p-1", "u-1", serde_json::json!({"projectName": "Demo"})).await.unwrap();
    orchestrator.join(&build.id).await;

    let final_build = orchestrator.storage().load_build("b-z").await.unwrap().unwrap();
    let coding = final_build.stage(&StageId::new("coding_file").unwrap()).unwrap();
    assert_eq!(coding.attempt_count, 1);
    assert_eq!(coding.status, StageStatus::Error);
    assert_eq!(final_build.status, BuildStatus::Failed);
}

/// Build record round-trips through serialization unchanged (`spec.md` §8
/// round-trip property).
#[tokio::test]
async fn build_record_serialization_round_trips() {
    let orchestrator = test_orchestrator().await;
    let build = orchestrator
        .submit("b-rt", "p-1", "u-1", serde_json::json!({"projectName": "RoundTrip"}))
        .await
        .unwrap();
    orchestrator.join(&build.id).await;

    let loaded = orchestrator.storage().load_build("b-rt").await.unwrap().unwrap();
    let json = serde_json::to_string(&loaded).unwrap();
    let reparsed: buildforge::orchestrator::build::Build = serde_json::from_str(&json).unwrap();
    assert_eq!(reparsed.id, loaded.id);
    assert_eq!(reparsed.status, loaded.status);
    assert_eq!(reparsed.stages.len(), loaded.stages.len());
    assert_eq!(reparsed.progress, loaded.progress);
}
