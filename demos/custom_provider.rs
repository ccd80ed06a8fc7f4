//! Demo: registering a custom provider alongside the built-in `demo`
//! fallback and watching the Model Router choose between them by weight,
//! then forcing a fallback by failing the primary provider.
//!
//! ```bash
//! cargo run --example custom_provider
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buildforge::message::Message;
use buildforge::router::{
    AgentRole, ChunkStream, DemoProvider, ModelRouter, Provider, ProviderSpec, RouterConfig, RouterError, RouterResponse, RouterTask, TokenUsage,
};
use tracing_subscriber::{fmt, EnvFilter};

/// A provider that fails its first `fail_until` calls with a transient
/// `ProviderUnavailable`, then succeeds — enough to exercise the router's
/// retry/backoff path without a real network dependency.
struct FlakyProvider {
    name: String,
    calls: AtomicU32,
    fail_until: u32,
}

impl FlakyProvider {
    fn new(name: &str, fail_until: u32) -> Self {
        Self { name: name.to_string(), calls: AtomicU32::new(0), fail_until }
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
            cost: 0.002,
            latency_ms: 30,
            provider: self.name.clone(),
            model: "flaky-v1".to_string(),
        })
    }

    async fn stream(&self, _role: AgentRole, _messages: &[Message]) -> Result<ChunkStream, RouterError> {
        Err(RouterError::ProviderUnavailable { provider: self.name.clone(), message: "streaming not supported in this demo".to_string() })
    }
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("custom_provider=info".parse().unwrap()))
        .init();

    let router = ModelRouter::new(RouterConfig::default());

    // Primary: cheaper, but fails its first two calls.
    router
        .register(
            ProviderSpec::new("acme-llm", [AgentRole::Coder, AgentRole::Tester])
                .with_cost_per_token(0.0005)
                .with_base_latency(Duration::from_millis(200))
                .with_base_reliability(0.9),
            Arc::new(FlakyProvider::new("acme-llm", 2)),
        )
        .await;
    // Fallback: the always-succeeding demo provider.
    router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;

    for attempt in 1..=3 {
        let task = RouterTask::new(AgentRole::Coder, vec![Message::user("write a health check endpoint")]);
        match router.route_task(task).await {
            Ok(response) => println!("attempt {attempt}: provider={} content={:?}", response.provider, response.content),
            Err(err) => println!("attempt {attempt}: failed: {err}"),
        }
    }
}
