//! The Model Router itself: provider pool, selection, retry/fallback,
//! streaming, and accounting (`spec.md` §4.2).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::router::circuit_breaker::CircuitBreaker;
use crate::router::config::RouterConfig;
use crate::router::errors::{AttemptRecord, RouterError};
use crate::router::provider::{DemoProvider, Provider, ProviderSpec};
use crate::router::rate_limiter::{RateLimiter, ReservoirConfig};
use crate::router::stats::ProviderStats;
use crate::router::task::{AgentRole, Complexity, RouterResponse, RouterTask, StreamChunk, StreamSummary};

struct ProviderEntry {
    spec: ProviderSpec,
    provider: Arc<dyn Provider>,
    circuit: RwLock<CircuitBreaker>,
    limiter: RateLimiter,
    stats: RwLock<ProviderStats>,
}

/// Role-to-provider dispatch layer: the only central, injected singleton
/// alongside the Stage Registry (`spec.md` §5).
pub struct ModelRouter {
    providers: RwLock<FxHashMap<String, Arc<ProviderEntry>>>,
    registration_order: RwLock<Vec<String>>,
    config: RouterConfig,
    role_concurrency: RwLock<FxHashMap<AgentRole, AtomicU32>>,
    role_concurrency_cap: u32,
}

const ROLE_CONCURRENCY_CAP: u32 = 16;

impl ModelRouter {
    pub fn new(config: RouterConfig) -> Arc<Self> {
        Arc::new(Self {
            providers: RwLock::new(FxHashMap::default()),
            registration_order: RwLock::new(Vec::new()),
            config,
            role_concurrency: RwLock::new(FxHashMap::default()),
            role_concurrency_cap: ROLE_CONCURRENCY_CAP,
        })
    }

    pub fn with_role_concurrency_cap(config: RouterConfig, cap: u32) -> Arc<Self> {
        Arc::new(Self {
            providers: RwLock::new(FxHashMap::default()),
            registration_order: RwLock::new(Vec::new()),
            config,
            role_concurrency: RwLock::new(FxHashMap::default()),
            role_concurrency_cap: cap.max(1),
        })
    }

    /// Builds a router from the environment, always including the `demo`
    /// provider so the system is usable with zero configuration
    /// (`spec.md` §4.2: "a built-in `demo` provider that always succeeds").
    pub async fn from_env() -> Arc<Self> {
        let config = RouterConfig::from_env();
        let router = Self::new(config);
        router
            .register(DemoProvider::spec(), Arc::new(DemoProvider::new()))
            .await;
        router
    }

    pub async fn register(&self, spec: ProviderSpec, provider: Arc<dyn Provider>) {
        let name = spec.name.clone();
        let limiter = RateLimiter::new(ReservoirConfig::default());
        let circuit = CircuitBreaker::with_config(spec.circuit_failure_threshold, spec.circuit_open_timeout, spec.circuit_max_timeout);
        let entry = Arc::new(ProviderEntry {
            stats: RwLock::new(ProviderStats::new(spec.base_latency, spec.base_reliability)),
            circuit: RwLock::new(circuit),
            limiter,
            provider,
            spec,
        });
        self.providers.write().await.insert(name.clone(), Arc::clone(&entry));
        self.registration_order.write().await.push(name);
    }

    async fn eligible_providers(&self, role: AgentRole) -> Vec<Arc<ProviderEntry>> {
        let guard = self.providers.read().await;
        let order = self.registration_order.read().await;
        let mut eligible = Vec::new();
        for name in order.iter() {
            if let Some(entry) = guard.get(name) {
                if entry.spec.supports(role) {
                    // `would_allow` (not `is_open`) so a timed-out Open
                    // breaker is selectable again here; the real Open ->
                    // Half-Open transition happens once, in
                    // `call_with_retry`'s `allow_request` call, so the
                    // single Half-Open probe slot isn't consumed twice.
                    if entry.circuit.read().await.would_allow() {
                        eligible.push(Arc::clone(entry));
                    }
                }
            }
        }
        eligible
    }

    /// `spec.md` §4.2 selection algorithm steps 3-4.
    async fn select(&self, role: AgentRole, complexity: Complexity, exclude: &[String]) -> Option<Arc<ProviderEntry>> {
        let candidates = self.eligible_providers(role).await;
        let mut best: Option<(Arc<ProviderEntry>, f64)> = None;
        for candidate in candidates {
            if exclude.contains(&candidate.spec.name) {
                continue;
            }
            let stats = candidate.stats.read().await;
            let base_latency = candidate.spec.base_latency.as_millis().max(1) as f64;
            let observed_latency = stats.observed_latency_ms.max(1.0);
            let base_cost = 0.000_002_f64.max(f64::MIN_POSITIVE);
            let cost = candidate.spec.cost_per_token.max(f64::MIN_POSITIVE);
            let weight = stats.reliability * (base_latency / observed_latency) * (base_cost / cost)
                * complexity.weight_factor();
            drop(stats);
            match &best {
                Some((_, best_weight)) if *best_weight >= weight => {
                    if (*best_weight - weight).abs() < f64::EPSILON {
                        // Tie: lower cost wins, then registration order (already iterated in order).
                        if candidate.spec.cost_per_token < best.as_ref().unwrap().0.spec.cost_per_token {
                            best = Some((candidate, weight));
                        }
                    }
                }
                _ => best = Some((candidate, weight)),
            }
        }
        best.map(|(entry, _)| entry)
    }

    /// `spec.md` §4.2 `routeTask`.
    pub async fn route_task(&self, task: RouterTask) -> Result<RouterResponse, RouterError> {
        if task.is_empty_prompt() {
            return Err(RouterError::EmptyPrompt);
        }

        let mut excluded = Vec::new();
        let mut attempts = Vec::new();

        loop {
            let Some(entry) = self.select(task.role, task.complexity, &excluded).await else {
                if attempts.is_empty() {
                    return Err(RouterError::NoProviderForRole(task.role));
                }
                return Err(RouterError::FallbackExhausted {
                    role: task.role,
                    attempts,
                });
            };

            match self.call_with_retry(&entry, task.role, &task.messages).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    attempts.push(AttemptRecord {
                        provider: entry.spec.name.clone(),
                        model: "unknown".to_string(),
                        error: err.to_string(),
                    });
                    excluded.push(entry.spec.name.clone());
                    if err.is_fast_fail() || !task.fallback_allowed {
                        return Err(RouterError::FallbackExhausted {
                            role: task.role,
                            attempts,
                        });
                    }
                }
            }
        }
    }

    /// Retries one provider up to `max_retries`, honoring backoff and
    /// rate-limit/circuit-breaker state, before giving up on that provider.
    async fn call_with_retry(
        &self,
        entry: &Arc<ProviderEntry>,
        role: AgentRole,
        messages: &[crate::message::Message],
    ) -> Result<RouterResponse, RouterError> {
        let mut attempt: u32 = 0;
        loop {
            {
                let mut circuit = entry.circuit.write().await;
                if !circuit.allow_request() {
                    return Err(RouterError::ProviderUnavailable {
                        provider: entry.spec.name.clone(),
                        message: "circuit breaker open".to_string(),
                    });
                }
            }
            entry.limiter.acquire().await;

            let started = std::time::Instant::now();
            let result = entry.provider.call(role, messages).await;
            match result {
                Ok(mut response) => {
                    response.latency_ms = started.elapsed().as_millis() as u64;
                    entry.circuit.write().await.record_success();
                    entry.limiter.record_success().await;
                    entry.stats.write().await.record_success(
                        response.latency_ms,
                        response.tokens.total(),
                        response.cost,
                    );
                    return Ok(response);
                }
                Err(err) => {
                    entry.stats.write().await.record_failure();
                    if let RouterError::RateLimited { retry_after_secs, .. } = &err {
                        entry.limiter.record_rate_limited(Some(Duration::from_secs(*retry_after_secs))).await;
                        entry.stats.write().await.record_rate_limit_hit();
                    }
                    let was_open_before = entry.circuit.read().await.is_open();
                    entry.circuit.write().await.record_failure();
                    if !was_open_before && entry.circuit.read().await.is_open() {
                        entry.stats.write().await.record_circuit_trip();
                    }

                    if err.is_fast_fail() || !err.is_retryable() {
                        return Err(err);
                    }
                    attempt += 1;
                    if attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    let backoff = self.backoff_for(attempt);
                    sleep(backoff).await;
                }
            }
        }
    }

    /// `base * 2^(attempt-1) + jitter(±20%)`, capped at the configured
    /// ceiling (`spec.md` §4.2, §8 scenario 2).
    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as f64;
        let exp = base * 2f64.powi(attempt.saturating_sub(1) as i32);
        let jitter_frac = rand::rng().random_range(-0.2..=0.2);
        let jittered = (exp * (1.0 + jitter_frac)).max(0.0);
        Duration::from_millis(jittered as u64).min(self.config.backoff_ceiling)
    }

    /// Streaming completion (`spec.md` §4.2 `stream`): same selection logic,
    /// but on mid-stream failure emits a terminal error rather than
    /// silently switching providers.
    pub async fn stream(
        &self,
        task: RouterTask,
    ) -> Result<(Arc<str>, impl futures_util::Stream<Item = Result<StreamChunk, RouterError>>), RouterError> {
        if task.is_empty_prompt() {
            return Err(RouterError::EmptyPrompt);
        }
        let entry = self
            .select(task.role, task.complexity, &[])
            .await
            .ok_or(RouterError::NoProviderForRole(task.role))?;
        {
            let mut circuit = entry.circuit.write().await;
            if !circuit.allow_request() {
                return Err(RouterError::ProviderUnavailable {
                    provider: entry.spec.name.clone(),
                    message: "circuit breaker open".to_string(),
                });
            }
        }
        entry.limiter.acquire().await;
        let provider_name: Arc<str> = Arc::from(entry.spec.name.as_str());
        let chunks = entry.provider.stream(task.role, &task.messages).await?;
        Ok((provider_name, chunks))
    }

    /// Builds the [`StreamSummary`] once a caller has drained the chunk
    /// stream to its terminal record, recording accounting against the
    /// provider that served it.
    pub async fn finish_stream(
        &self,
        provider_name: &str,
        tokens_total: u64,
        latency_ms: u64,
        chunk_count: u64,
        success: bool,
    ) -> Option<StreamSummary> {
        let guard = self.providers.read().await;
        let entry = guard.get(provider_name)?;
        let cost = tokens_total as f64 * entry.spec.cost_per_token;
        if success {
            entry.circuit.write().await.record_success();
            entry.stats.write().await.record_success(latency_ms, tokens_total, cost);
        } else {
            entry.circuit.write().await.record_failure();
            entry.stats.write().await.record_failure();
        }
        Some(StreamSummary {
            tokens: crate::router::task::TokenUsage {
                input: 0,
                output: tokens_total,
            },
            cost,
            latency_ms,
            chunk_count,
            provider: provider_name.to_string(),
            model: "unknown".to_string(),
        })
    }

    /// Agent-role assignment façade: maps a task type to a role via keyword
    /// similarity, tracks per-role concurrent load, and refuses assignment
    /// above the role's cap (`spec.md` §4.2).
    pub async fn assign(&self, task_type: &str, task: RouterTask) -> Result<RouterResponse, RouterError> {
        let role = AgentRole::from_task_type(task_type).unwrap_or(task.role);
        self.acquire_role_slot(role).await?;
        let result = self.route_task(RouterTask { role, ..task }).await;
        self.release_role_slot(role).await;
        result
    }

    async fn acquire_role_slot(&self, role: AgentRole) -> Result<(), RouterError> {
        let mut guard = self.role_concurrency.write().await;
        let counter = guard.entry(role).or_insert_with(|| AtomicU32::new(0));
        let current = counter.fetch_add(1, Ordering::SeqCst);
        if current >= self.role_concurrency_cap {
            counter.fetch_sub(1, Ordering::SeqCst);
            return Err(RouterError::RoleOverloaded(role));
        }
        Ok(())
    }

    async fn release_role_slot(&self, role: AgentRole) {
        if let Some(counter) = self.role_concurrency.read().await.get(&role) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Polls every registered provider's `health_check`, used by a
    /// background task on `HEALTH_CHECK_INTERVAL_MS` (`spec.md` §6).
    pub async fn poll_health(&self) {
        let guard = self.providers.read().await;
        for entry in guard.values() {
            let healthy = entry.provider.health_check().await;
            if !healthy {
                entry.circuit.write().await.record_failure();
            }
        }
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.registration_order.read().await.clone()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

/// Drains a chunk stream to completion, returning the concatenated content
/// and final chunk count — a convenience for callers that don't need to
/// react to chunks incrementally (tests, CLI demo).
pub async fn collect_stream(
    mut stream: impl futures_util::Stream<Item = Result<StreamChunk, RouterError>> + Unpin,
) -> Result<(String, u64), RouterError> {
    let mut content = String::new();
    let mut chunk_count = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        content.push_str(&chunk.content_chunk);
        chunk_count += 1;
        if chunk.done {
            break;
        }
    }
    Ok((content, chunk_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    async fn demo_router() -> Arc<ModelRouter> {
        let router = ModelRouter::new(RouterConfig::default());
        router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;
        router
    }

    #[tokio::test]
    async fn routes_to_demo_provider_when_only_eligible() {
        let router = demo_router().await;
        let task = RouterTask::new(AgentRole::Coder, vec![Message::user("build a todo app")]);
        let response = router.route_task(task).await.unwrap();
        assert_eq!(response.provider, "demo");
    }

    #[tokio::test]
    async fn empty_prompt_never_reaches_a_provider() {
        let router = demo_router().await;
        let task = RouterTask::new(AgentRole::Coder, vec![Message::user("   ")]);
        let err = router.route_task(task).await.unwrap_err();
        assert!(matches!(err, RouterError::EmptyPrompt));
    }

    #[tokio::test]
    async fn no_provider_for_role_without_registration() {
        let router = ModelRouter::new(RouterConfig::default());
        let task = RouterTask::new(AgentRole::Deployer, vec![Message::user("deploy it")]);
        let err = router.route_task(task).await.unwrap_err();
        assert!(matches!(err, RouterError::NoProviderForRole(_)));
    }

    #[tokio::test]
    async fn role_overload_is_refused() {
        let router = ModelRouter::with_role_concurrency_cap(RouterConfig::default(), 1);
        router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;
        router.acquire_role_slot(AgentRole::Coder).await.unwrap();
        let err = router.acquire_role_slot(AgentRole::Coder).await.unwrap_err();
        assert!(matches!(err, RouterError::RoleOverloaded(_)));
        router.release_role_slot(AgentRole::Coder).await;
        router.acquire_role_slot(AgentRole::Coder).await.unwrap();
    }
}
