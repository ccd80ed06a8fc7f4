//! The per-build execution loop: drives stages wave by wave, retrying and
//! timing out each attempt, then merging concurrent outcomes at a
//! deterministic barrier ordered by stage id (`SPEC_FULL.md` §4.3, grounded
//! on the teacher's superstep/barrier-merge shape generalized from
//! per-channel reducers to `AddArtifacts`/`AddStageErrors` reducers over the
//! build record).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::errors::{ErrorEvent, LadderError};
use crate::event_fabric::{EventEnvelope, EventFabric};
use crate::registry::StageRegistry;
use crate::router::ModelRouter;
use crate::stage::{StageContext, StageError, StageHandler, StageOutcome};
use crate::storage::Storage;
use crate::types::{BuildStatus, StageId, StageStatus};

use super::build::{Artifact, StageEvent, StageInstance};
use super::config::OrchestratorConfig;
use super::errors::OrchestratorError;
use super::scheduler::{layers, Scheduler};

/// Shared, read-mostly collaborators the execution loop needs; one instance
/// per [`super::Orchestrator`], cheap to clone across build tasks.
#[derive(Clone)]
pub(super) struct ExecutionContext {
    pub registry: Arc<StageRegistry>,
    pub router: Arc<ModelRouter>,
    pub storage: Arc<dyn Storage>,
    pub fabric: Arc<EventFabric>,
    pub handlers: Arc<FxHashMap<StageId, Arc<dyn StageHandler>>>,
    pub config: OrchestratorConfig,
}

/// One stage's outcome after all its attempts for this wave, ready to be
/// merged into the shared `Build` at the barrier.
struct StageRunResult {
    stage_id: StageId,
    instance: StageInstance,
    artifacts: Vec<Artifact>,
    new_events: Vec<StageEvent>,
    /// Every stage-error logged for this run: one non-final entry per
    /// retried attempt, plus the terminal entry if the final outcome was a
    /// failure (`spec.md` §7: "every error ... recorded ... with attempt
    /// number and final-failure flag").
    errors: Vec<ErrorEvent>,
    /// `retrying`/`retry-success` notices to publish over the fabric
    /// alongside this stage's sub-events (`spec.md` §4.3 step 4, §8
    /// invariant 3).
    retry_notices: Vec<RetryNotice>,
    /// Whether this outcome should fail the whole build, not just its
    /// dependents (`spec.md` §4.3: a critical stage's terminal failure halts
    /// the build; a non-critical one just leaves its dependents unready).
    halts_build: bool,
}

/// A retry-lifecycle notice surfaced to subscribers: either a `retrying`
/// event emitted before backing off for another attempt, or a single
/// `retry-success` summary once a previously-retried stage finally succeeds.
struct RetryNotice {
    status: &'static str,
    message: String,
    details: Value,
}

/// `base * 2^(attempt-1)` with ±20% jitter, capped at 30s — the same shape
/// as the Model Router's own retry backoff (`router::pool::backoff_for`).
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as f64;
    let exp = base_ms * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jitter_frac = rand::rng().random_range(-0.2..=0.2);
    let jittered = (exp * (1.0 + jitter_frac)).max(0.0);
    Duration::from_millis(jittered as u64).min(Duration::from_secs(30))
}

async fn run_stage_once(
    handler: &dyn StageHandler,
    build_id: &str,
    stage_id: &StageId,
    spec: &Value,
    artifacts_so_far: &[Artifact],
    correlation_id: String,
    router: Arc<ModelRouter>,
    cancel: Arc<AtomicBool>,
    timeout: Duration,
) -> (Result<StageOutcome, OrchestratorError>, Vec<StageEvent>) {
    let mut ctx = StageContext::new(build_id, stage_id.clone(), spec, artifacts_so_far, correlation_id, router, cancel);
    let outcome = match tokio::time::timeout(timeout, handler.execute(&mut ctx)).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(StageError::Router(err))) => Err(OrchestratorError::Router(err)),
        Ok(Err(StageError::Handler(message))) => Err(OrchestratorError::HandlerFailed(message)),
        Ok(Err(StageError::Cancelled)) => Err(OrchestratorError::Cancelled),
        Err(_elapsed) => Err(OrchestratorError::StageTimeout {
            stage_id: stage_id.to_string(),
            timeout_secs: timeout.as_secs(),
        }),
    };
    (outcome, ctx.into_events())
}

/// Runs every attempt of one stage until it reaches a terminal status or
/// runs out of retries, per `spec.md` §4.3 step 3's retry policy.
#[allow(clippy::too_many_arguments)]
async fn execute_stage_with_retry(
    handler: Arc<dyn StageHandler>,
    registry: &StageRegistry,
    router: Arc<ModelRouter>,
    build_id: String,
    mut instance: StageInstance,
    spec: Arc<Value>,
    artifacts_so_far: Arc<Vec<Artifact>>,
    cancel: Arc<AtomicBool>,
    backoff_base: Duration,
) -> StageRunResult {
    let stage_id = instance.stage_id.clone();
    let timeout = registry.get(&stage_id).map(|d| d.timeout).unwrap_or(crate::registry::DEFAULT_TIMEOUT);
    let critical = registry.is_critical(&stage_id);
    let retryable = registry.is_retryable(&stage_id);
    let mut new_events = Vec::new();
    let mut errors: Vec<ErrorEvent> = Vec::new();
    let mut retry_notices: Vec<RetryNotice> = Vec::new();
    let mut retries_needed: u32 = 0;

    loop {
        if cancel.load(Ordering::SeqCst) {
            instance.mark_terminal(StageStatus::Cancelled);
            let err = ErrorEvent::stage(stage_id.as_str(), instance.attempt_count, LadderError::msg("build cancelled"))
                .with_tag("final_failure")
                .with_context(serde_json::json!({ "build_id": build_id }));
            errors.push(err);
            return StageRunResult {
                stage_id,
                instance,
                artifacts: Vec::new(),
                new_events,
                errors,
                retry_notices,
                halts_build: true,
            };
        }

        instance.mark_running();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (result, events) = run_stage_once(
            handler.as_ref(),
            &build_id,
            &stage_id,
            &spec,
            &artifacts_so_far,
            correlation_id,
            Arc::clone(&router),
            Arc::clone(&cancel),
            timeout,
        )
        .await;
        for event in events {
            instance.push_event(event.clone());
            new_events.push(event);
        }

        match result {
            Ok(outcome) => {
                if !registry.can_transition(&stage_id, StageStatus::Running, outcome.status) {
                    let message = format!("handler returned disallowed status {}", outcome.status);
                    instance.mark_terminal(StageStatus::Error);
                    instance.terminal_error = Some(message.clone());
                    let err = ErrorEvent::stage(stage_id.as_str(), instance.attempt_count, LadderError::msg(message))
                        .with_tag("final_failure")
                        .with_context(serde_json::json!({ "build_id": build_id }));
                    errors.push(err);
                    return StageRunResult { stage_id, instance, artifacts: Vec::new(), new_events, errors, retry_notices, halts_build: true };
                }

                // `spec.md` §9 resolution 4: a critical stage that only
                // partially completed is treated as an error, not a success.
                let critical_partial = critical && outcome.status == StageStatus::Partial;
                if critical_partial && retryable && !instance.attempts_exhausted() {
                    sleep(backoff_for(backoff_base, instance.attempt_count)).await;
                    continue;
                }

                instance.mark_terminal(outcome.status);
                if critical_partial {
                    let err = ErrorEvent::stage(stage_id.as_str(), instance.attempt_count, LadderError::msg("critical stage completed only partially"))
                        .with_tag("final_failure")
                        .with_context(serde_json::json!({ "build_id": build_id }));
                    instance.terminal_error = Some(err.error.message.clone());
                    errors.push(err);
                    return StageRunResult { stage_id, instance, artifacts: outcome.artifacts, new_events, errors, retry_notices, halts_build: true };
                }
                // `spec.md` §8 invariant 3: a `retry-success` summary is
                // emitted exactly when the final status is success and at
                // least one retry was needed to get there.
                if retries_needed > 0 {
                    retry_notices.push(RetryNotice {
                        status: "retry-success",
                        message: format!("stage {stage_id} succeeded after {retries_needed} retry(ies)"),
                        details: serde_json::json!({ "retriesNeeded": retries_needed, "attempt": instance.attempt_count }),
                    });
                }
                return StageRunResult { stage_id, instance, artifacts: outcome.artifacts, new_events, errors, retry_notices, halts_build: false };
            }
            Err(err) => {
                let can_retry = !err.is_fast_fail() && err.is_retryable() && retryable && !instance.attempts_exhausted();
                if can_retry {
                    let attempt = instance.attempt_count;
                    let backoff = backoff_for(backoff_base, attempt);
                    // Non-final: one stage-error log entry per retried
                    // attempt (`spec.md` §7), distinct from the terminal
                    // entry a final failure appends below.
                    let retry_error = ErrorEvent::stage(stage_id.as_str(), attempt, LadderError::msg(err.to_string()))
                        .with_tag("retry")
                        .with_context(serde_json::json!({ "build_id": build_id }));
                    errors.push(retry_error);
                    retries_needed += 1;
                    retry_notices.push(RetryNotice {
                        status: "retrying",
                        message: format!("stage {stage_id} retrying after attempt {attempt} failed: {err}"),
                        details: serde_json::json!({
                            "attempt": attempt,
                            "maxAttempts": instance.max_attempts,
                            "backoffMs": backoff.as_millis() as u64,
                        }),
                    });
                    sleep(backoff).await;
                    continue;
                }
                let cancelled = matches!(err, OrchestratorError::Cancelled);
                instance.mark_terminal(if cancelled { StageStatus::Cancelled } else { StageStatus::Error });
                instance.terminal_error = Some(err.to_string());
                let event = ErrorEvent::stage(stage_id.as_str(), instance.attempt_count, LadderError::msg(err.to_string()))
                    .with_tag("final_failure")
                    .with_context(serde_json::json!({ "build_id": build_id }));
                errors.push(event);
                return StageRunResult {
                    stage_id,
                    instance,
                    artifacts: Vec::new(),
                    new_events,
                    errors,
                    retry_notices,
                    halts_build: critical || cancelled,
                };
            }
        }
    }
}

async fn publish_stage_update(fabric: &EventFabric, build_id: &str, result: &StageRunResult) {
    for event in &result.new_events {
        let envelope = EventEnvelope::stage_update(build_id, result.stage_id.as_str(), event.status.to_string(), event.message.clone())
            .with_details(event.details.clone());
        if let Err(err) = fabric.publish(build_id, envelope).await {
            warn!(%build_id, stage = %result.stage_id, %err, "failed to publish stage sub-event");
        }
    }
    for notice in &result.retry_notices {
        let envelope = EventEnvelope::stage_update(build_id, result.stage_id.as_str(), notice.status, notice.message.clone())
            .with_details(notice.details.clone());
        if let Err(err) = fabric.publish(build_id, envelope).await {
            warn!(%build_id, stage = %result.stage_id, %err, "failed to publish retry notice");
        }
    }
    let summary = EventEnvelope::stage_update(
        build_id,
        result.stage_id.as_str(),
        result.instance.status.to_string(),
        format!("stage {} reached {}", result.stage_id, result.instance.status),
    );
    if let Err(err) = fabric.publish(build_id, summary).await {
        warn!(%build_id, stage = %result.stage_id, %err, "failed to publish stage summary event");
    }
}

/// Drives `build_id` through every remaining stage wave by wave. Resumable:
/// stages already in a terminal status are skipped, so calling this again
/// after a restart (or via a retry endpoint) picks up where it left off
/// (`spec.md` §9: "resume-after-restart semantics").
#[instrument(skip(ctx, cancel), err)]
pub(super) async fn run_build(ctx: &ExecutionContext, build_id: String, cancel: Arc<AtomicBool>) -> Result<(), OrchestratorError> {
    let mut build = match ctx.storage.load_build(&build_id).await? {
        Some(build) => build,
        None => {
            warn!(%build_id, "run_build called for a build that no longer exists in storage");
            return Ok(());
        }
    };

    let order = ctx.registry.compile().map_err(|e| OrchestratorError::HandlerFailed(e.to_string()))?;
    if build.stages.is_empty() {
        for id in &order {
            if let Some(seed) = ctx.registry.instance_for(id, ctx.config.default_max_attempts) {
                build.stages.push(StageInstance::new(seed.stage_id, seed.max_attempts));
            }
        }
    }

    build.mark_running();
    ctx.storage.save_build(&build).await?;
    let _ = ctx
        .fabric
        .publish(&build_id, EventEnvelope::pipeline_update(&build_id, build.status.to_string(), "build started"))
        .await;

    let waves = layers(&order, &ctx.registry);
    let scheduler = Scheduler::new(ctx.config.stage_parallelism.max(1));
    let total_stages = build.stages.len().max(1);

    for wave in waves {
        let pending: Vec<StageId> = wave
            .into_iter()
            .filter(|id| build.stage(id).map_or(true, |s| !s.status.is_terminal()))
            .collect();
        if pending.is_empty() {
            continue;
        }
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        // `spec.md` §8 invariant 4: a stage never enters RUNNING before
        // every dependency has reached a terminal success status. Wave
        // order alone only guarantees a dependency's wave ran first, not
        // that it succeeded — a stage whose dependency failed is skipped
        // here rather than dispatched to its handler.
        let blocking_dependency = |stage_id: &StageId| -> Option<StageId> {
            ctx.registry
                .dependencies(stage_id)
                .into_iter()
                .find(|dep| !build.stage(dep).is_some_and(|s| s.status.is_success_terminal()))
        };

        let artifacts_snapshot = Arc::new(build.artifacts.clone());
        let spec_snapshot = Arc::new(build.spec.clone());
        let permits: Arc<Semaphore> = scheduler.permits();

        let futures = pending.into_iter().map(|stage_id| {
            let instance = build
                .stage(&stage_id)
                .cloned()
                .unwrap_or_else(|| StageInstance::new(stage_id.clone(), ctx.config.default_max_attempts));
            let blocked_on = blocking_dependency(&stage_id);
            let handler = ctx.handlers.get(&stage_id).cloned();
            let registry = Arc::clone(&ctx.registry);
            let router = Arc::clone(&ctx.router);
            let build_id = build_id.clone();
            let artifacts = Arc::clone(&artifacts_snapshot);
            let spec = Arc::clone(&spec_snapshot);
            let cancel = Arc::clone(&cancel);
            let backoff_base = ctx.config.retry_backoff_base;
            let permits = Arc::clone(&permits);
            async move {
                let _permit = permits.acquire_owned().await.expect("semaphore never closed");
                if let Some(dep) = blocked_on {
                    let critical = registry.is_critical(&instance.stage_id);
                    let mut instance = instance;
                    let message = format!("dependency {dep} did not complete successfully");
                    instance.mark_terminal(StageStatus::Error);
                    instance.terminal_error = Some(message.clone());
                    return StageRunResult {
                        stage_id: instance.stage_id.clone(),
                        instance,
                        artifacts: Vec::new(),
                        new_events: Vec::new(),
                        errors: vec![ErrorEvent::orchestrator(build_id, LadderError::msg(message)).with_tag("final_failure")],
                        retry_notices: Vec::new(),
                        halts_build: critical,
                    };
                }
                match handler {
                    Some(handler) => {
                        execute_stage_with_retry(handler, &registry, router, build_id, instance, spec, artifacts, cancel, backoff_base).await
                    }
                    None => {
                        let critical = registry.is_critical(&instance.stage_id);
                        let mut instance = instance;
                        instance.mark_terminal(StageStatus::Error);
                        instance.terminal_error = Some("no handler registered for this stage".to_string());
                        StageRunResult {
                            stage_id: instance.stage_id.clone(),
                            instance,
                            artifacts: Vec::new(),
                            new_events: Vec::new(),
                            errors: vec![
                                ErrorEvent::orchestrator(build_id, LadderError::msg("no handler registered for this stage")).with_tag("final_failure"),
                            ],
                            retry_notices: Vec::new(),
                            halts_build: critical,
                        }
                    }
                }
            }
        });

        let mut results: Vec<StageRunResult> = join_all(futures).await;
        results.sort_by(|a, b| a.stage_id.cmp(&b.stage_id));

        let mut fatal_stage: Option<StageId> = None;
        for result in results {
            publish_stage_update(&ctx.fabric, &build_id, &result).await;
            match build.stage_mut(&result.stage_id) {
                Some(slot) => *slot = result.instance,
                None => build.stages.push(result.instance),
            }
            build.artifacts.extend(result.artifacts);
            for error in result.errors {
                build.record_error(error);
            }
            if result.halts_build && fatal_stage.is_none() {
                fatal_stage = Some(result.stage_id);
            }
        }

        let completed = build.stages.iter().filter(|s| s.status.is_terminal()).count();
        build.set_progress(((completed * 100) / total_stages) as u8);
        ctx.storage.save_build(&build).await?;
        let _ = ctx
            .fabric
            .publish(
                &build_id,
                EventEnvelope::pipeline_update(&build_id, build.status.to_string(), format!("progress: {}%", build.progress)),
            )
            .await;

        if let Some(stage_id) = fatal_stage {
            let status = if cancel.load(Ordering::SeqCst) { BuildStatus::Cancelled } else { BuildStatus::Failed };
            build.mark_terminal(status, Some(format!("stage {stage_id} failed critically")));
            ctx.storage.save_build(&build).await?;
            let _ = ctx
                .fabric
                .publish(&build_id, EventEnvelope::pipeline_complete(&build_id, build.status.to_string()))
                .await;
            return Ok(());
        }
    }

    build.mark_terminal(BuildStatus::Completed, None);
    ctx.storage.save_build(&build).await?;
    let _ = ctx
        .fabric
        .publish(&build_id, EventEnvelope::pipeline_complete(&build_id, build.status.to_string()))
        .await;
    info!(%build_id, "build reached a terminal state");
    Ok(())
}
