#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buildforge::event_fabric::EventFabric;
use buildforge::message::Message;
use buildforge::orchestrator::{Orchestrator, OrchestratorConfig};
use buildforge::registry::StageRegistry;
use buildforge::router::{
    AgentRole, ChunkStream, DemoProvider, ModelRouter, Provider, RouterConfig, RouterError, RouterResponse, TokenUsage,
};
use buildforge::stage::{builtin_handlers, StageContext, StageError, StageHandler, StageOutcome};
use buildforge::storage::{InMemoryStorage, Storage};
use buildforge::types::StageStatus;

/// A router-backed registry plus a demo-only router, wired to an in-memory
/// orchestrator — the minimal harness most end-to-end tests start from.
pub async fn test_orchestrator() -> Arc<Orchestrator> {
    let registry = Arc::new(StageRegistry::with_builtins());
    let router = ModelRouter::new(RouterConfig::default());
    router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let fabric = EventFabric::new();
    Orchestrator::new(registry, router, storage, fabric, OrchestratorConfig::default())
}

/// Same as [`test_orchestrator`] but with a caller-supplied handler map
/// layered over the built-ins, for tests that substitute one stage's
/// behavior (retry, cancellation) without touching the rest of the pipeline.
pub async fn test_orchestrator_with_handler(stage_id: &str, handler: Arc<dyn StageHandler>) -> Arc<Orchestrator> {
    let registry = Arc::new(StageRegistry::with_builtins());
    let router = ModelRouter::new(RouterConfig::default());
    router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let fabric = EventFabric::new();
    let mut handlers = builtin_handlers();
    handlers.insert(buildforge::types::StageId::new(stage_id).unwrap(), handler);
    Orchestrator::with_handlers(registry, router, storage, fabric, OrchestratorConfig::default(), handlers)
}

/// Fails its first `fail_until` calls with a retryable `ProviderUnavailable`,
/// then succeeds — exercises the router's retry/backoff and fallback paths
/// without a network dependency.
pub struct FlakyProvider {
    name: String,
    calls: AtomicU32,
    fail_until: u32,
}

impl FlakyProvider {
    pub fn new(name: &str, fail_until: u32) -> Self {
        Self { name: name.to_string(), calls: AtomicU32::new(0), fail_until }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FlakyProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, role: AgentRole, messages: &[Message]) -> Result<RouterResponse, RouterError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_until {
            return Err(RouterError::ProviderUnavailable {
                provider: self.name.clone(),
                message: format!("simulated outage (attempt {attempt})"),
            });
        }
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(RouterResponse {
            content: format!("[{}:{role:?}] handled: {prompt}", self.name),
            tokens: TokenUsage { input: 12, output: 8 },
            cost: 0.001,
            latency_ms: 5,
            provider: self.name.clone(),
            model: "flaky-v1".to_string(),
        })
    }

    async fn stream(&self, _role: AgentRole, _messages: &[Message]) -> Result<ChunkStream, RouterError> {
        Err(RouterError::ProviderUnavailable { provider: self.name.clone(), message: "no streaming in this harness".to_string() })
    }
}

/// Always returns a rate-limited error carrying a fixed `retry_after`.
pub struct AlwaysRateLimited {
    name: String,
    retry_after_secs: u64,
    calls: AtomicU32,
}

impl AlwaysRateLimited {
    pub fn new(name: &str, retry_after_secs: u64) -> Self {
        Self { name: name.to_string(), retry_after_secs, calls: AtomicU32::new(0) }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for AlwaysRateLimited {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _role: AgentRole, _messages: &[Message]) -> Result<RouterResponse, RouterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RouterError::RateLimited { provider: self.name.clone(), retry_after_secs: self.retry_after_secs })
    }

    async fn stream(&self, _role: AgentRole, _messages: &[Message]) -> Result<ChunkStream, RouterError> {
        Err(RouterError::RateLimited { provider: self.name.clone(), retry_after_secs: self.retry_after_secs })
    }
}

/// Fails every call with a non-retryable error — used to drive a circuit
/// breaker open deterministically.
pub struct AlwaysDown {
    name: String,
}

impl AlwaysDown {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl Provider for AlwaysDown {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _role: AgentRole, _messages: &[Message]) -> Result<RouterResponse, RouterError> {
        Err(RouterError::ConnectionReset { provider: self.name.clone() })
    }

    async fn stream(&self, _role: AgentRole, _messages: &[Message]) -> Result<ChunkStream, RouterError> {
        Err(RouterError::ConnectionReset { provider: self.name.clone() })
    }
}

/// A multi-event stage handler that yields between sub-events, so a
/// concurrently issued cancellation has an await boundary to land on
/// (`spec.md` §8 invariant 5 / scenario 6).
pub struct SlowMultiEventHandler {
    pub total_events: usize,
    pub step_delay: Duration,
}

#[async_trait]
impl StageHandler for SlowMultiEventHandler {
    async fn execute(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageError> {
        for i in 0..self.total_events {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            ctx.emit(format!("processed file {i}"), StageStatus::Done);
            tokio::time::sleep(self.step_delay).await;
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled);
            }
        }
        Ok(StageOutcome::new(StageStatus::Done))
    }
}

/// Fails its first `fail_times` attempts with a handler-level error, then
/// succeeds — for exercising the orchestrator's own per-stage retry loop
/// (`spec.md` §8 scenario 2), independent of the Model Router's retries.
pub struct FailNTimesHandler {
    pub fail_times: u32,
    attempts: AtomicU32,
}

impl FailNTimesHandler {
    pub fn new(fail_times: u32) -> Self {
        Self { fail_times, attempts: AtomicU32::new(0) }
    }
}

#[async_trait]
impl StageHandler for FailNTimesHandler {
    async fn execute(&self, _ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_times {
            return Err(StageError::Handler(format!("simulated failure on attempt {attempt}")));
        }
        Ok(StageOutcome::new(StageStatus::Done))
    }
}
