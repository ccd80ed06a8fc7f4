//! The Provider contract: a tagged variant over the capability set
//! (`SPEC_FULL.md` §9 Design Note — "dynamic-dispatch providers ... become a
//! tagged variant ... selection is driven by data, not type checks").
//!
//! Every concrete backend implements the same `{call, stream, health_check}`
//! contract; which providers exist for a role, and how they're weighted, is
//! entirely a function of the data in [`ProviderSpec`] plus observed stats —
//! never a match on a provider's Rust type.

use std::collections::HashSet;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::message::Message;
use crate::router::circuit_breaker::CircuitBreaker;
use crate::router::errors::RouterError;
use crate::router::task::{AgentRole, RouterResponse, StreamChunk, StreamSummary, TokenUsage};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, RouterError>> + Send>>;

/// Static registration data for one provider: capabilities and the baseline
/// figures the weight formula normalizes observed stats against
/// (`spec.md` §4.2 step 3: `w = reliability * (baseLatency/observedLatency) *
/// (baseCost/costPerToken)`).
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    pub name: String,
    pub capabilities: HashSet<AgentRole>,
    pub cost_per_token: f64,
    pub max_tokens: u64,
    pub base_latency: Duration,
    pub base_reliability: f64,
    pub request_timeout: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_open_timeout: Duration,
    pub circuit_max_timeout: Duration,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, capabilities: impl IntoIterator<Item = AgentRole>) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
            cost_per_token: 0.000_002,
            max_tokens: 8_192,
            base_latency: Duration::from_millis(800),
            base_reliability: 0.95,
            request_timeout: Duration::from_secs(30),
            circuit_failure_threshold: CircuitBreaker::DEFAULT_THRESHOLD,
            circuit_open_timeout: CircuitBreaker::DEFAULT_OPEN_TIMEOUT,
            circuit_max_timeout: CircuitBreaker::DEFAULT_MAX_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_cost_per_token(mut self, cost: f64) -> Self {
        self.cost_per_token = cost;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_base_latency(mut self, latency: Duration) -> Self {
        self.base_latency = latency;
        self
    }

    #[must_use]
    pub fn with_base_reliability(mut self, reliability: f64) -> Self {
        self.base_reliability = reliability.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the circuit breaker's consecutive-failure threshold and its
    /// Open-state timeout (`spec.md` §4.2: "Open skips the provider for a
    /// timeout window ... after which it enters Half-Open"). Mainly useful
    /// in tests that need the timeout to elapse in milliseconds rather than
    /// the default minute.
    #[must_use]
    pub fn with_circuit_config(mut self, failure_threshold: u32, open_timeout: Duration) -> Self {
        self.circuit_failure_threshold = failure_threshold;
        self.circuit_open_timeout = open_timeout;
        self
    }

    pub fn supports(&self, role: AgentRole) -> bool {
        self.capabilities.contains(&role)
    }
}

/// The transport contract a concrete LLM backend implements. Selection never
/// inspects the concrete type — only [`ProviderSpec`] and observed stats.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, role: AgentRole, messages: &[Message]) -> Result<RouterResponse, RouterError>;

    async fn stream(&self, role: AgentRole, messages: &[Message]) -> Result<ChunkStream, RouterError>;

    /// Lightweight liveness probe used by the router's periodic health poll
    /// (`spec.md` §6 `HEALTH_CHECK_INTERVAL_MS`).
    async fn health_check(&self) -> bool {
        true
    }
}

/// HTTP-backed provider reading `PROVIDER_<NAME>_API_KEY` (`spec.md` §6).
/// Posts a generic `{model, messages}` chat-completion body and expects a
/// `{content, input_tokens, output_tokens}` JSON response; concrete vendors
/// sit behind this same shape via a reverse proxy or adapter, keeping the
/// router itself vendor-agnostic (`spec.md` §9: "tagged variant ... not type
/// checks").
pub struct HttpProvider {
    name: String,
    model: String,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, model: impl Into<String>, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(serde::Serialize)]
struct HttpChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(serde::Deserialize)]
struct HttpChatResponse {
    content: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _role: AgentRole, messages: &[Message]) -> Result<RouterResponse, RouterError> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&HttpChatRequest {
                model: &self.model,
                messages,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&self.name, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RouterError::Authentication {
                provider: self.name.clone(),
                message: format!("HTTP {status}"),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(RouterError::RateLimited {
                provider: self.name.clone(),
                retry_after_secs: retry_after,
            });
        }
        if status.is_server_error() {
            return Err(RouterError::ProviderUnavailable {
                provider: self.name.clone(),
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(RouterError::Authentication {
                provider: self.name.clone(),
                message: format!("HTTP {status}"),
            });
        }

        let body: HttpChatResponse = response
            .json()
            .await
            .map_err(|e| classify_reqwest_error(&self.name, e))?;

        Ok(RouterResponse {
            content: body.content,
            tokens: TokenUsage {
                input: body.input_tokens,
                output: body.output_tokens,
            },
            cost: 0.0,
            latency_ms: started.elapsed().as_millis() as u64,
            provider: self.name.clone(),
            model: self.model.clone(),
        })
    }

    async fn stream(&self, role: AgentRole, messages: &[Message]) -> Result<ChunkStream, RouterError> {
        // The demonstration HTTP backend has no streaming endpoint wired up;
        // callers that need streaming against a real vendor provide their
        // own `Provider` impl. Fall back to a single-chunk stream from the
        // non-streaming call so `stream()`'s contract still holds.
        let response = self.call(role, messages).await?;
        let chunk = StreamChunk {
            content_chunk: response.content,
            tokens_so_far: response.tokens.total(),
            done: true,
        };
        Ok(Box::pin(futures_util::stream::iter(vec![Ok(chunk)])))
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(&self.endpoint)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map(|r| r.status().is_success() || r.status() == reqwest::StatusCode::NOT_FOUND)
            .unwrap_or(false)
    }
}

fn classify_reqwest_error(provider: &str, err: reqwest::Error) -> RouterError {
    if err.is_timeout() {
        RouterError::Timeout {
            provider: provider.to_string(),
        }
    } else if err.is_connect() {
        RouterError::ConnectionReset {
            provider: provider.to_string(),
        }
    } else {
        RouterError::ProviderUnavailable {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Deterministic mock provider: always succeeds, used as the built-in
/// last-resort fallback and for `DEMO_MODE` (`spec.md` §4.2, §6).
pub struct DemoProvider {
    name: String,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self {
            name: "demo".to_string(),
        }
    }

    pub fn spec() -> ProviderSpec {
        ProviderSpec::new("demo", AgentRole::ALL.iter().copied())
            .with_cost_per_token(0.0)
            .with_base_latency(Duration::from_millis(50))
            .with_base_reliability(1.0)
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn demo_content(role: AgentRole, messages: &[Message]) -> String {
    let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
    format!("[demo:{role:?}] deterministic response to: {}", prompt.trim())
}

#[async_trait]
impl Provider for DemoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, role: AgentRole, messages: &[Message]) -> Result<RouterResponse, RouterError> {
        let content = demo_content(role, messages);
        let input = messages.iter().map(|m| m.content.len() as u64).sum::<u64>() / 4 + 1;
        let output = content.len() as u64 / 4 + 1;
        Ok(RouterResponse {
            content,
            tokens: TokenUsage { input, output },
            cost: 0.0,
            latency_ms: 5,
            provider: self.name.clone(),
            model: "demo-v1".to_string(),
        })
    }

    async fn stream(&self, role: AgentRole, messages: &[Message]) -> Result<ChunkStream, RouterError> {
        let content = demo_content(role, messages);
        let words: Vec<String> = content.split_whitespace().map(str::to_string).collect();
        let stream = async_stream::stream! {
            let mut tokens_so_far = 0u64;
            for word in &words {
                tokens_so_far += 1;
                yield Ok(StreamChunk {
                    content_chunk: format!("{word} "),
                    tokens_so_far,
                    done: false,
                });
            }
            yield Ok(StreamChunk {
                content_chunk: String::new(),
                tokens_so_far,
                done: true,
            });
        };
        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Terminal record closing a [`Provider::stream`] call, built by the router
/// once the underlying chunk stream reports `done`.
pub fn stream_summary(provider: &str, model: &str, tokens: TokenUsage, cost: f64, latency_ms: u64, chunk_count: u64) -> StreamSummary {
    StreamSummary {
        tokens,
        cost,
        latency_ms,
        chunk_count,
        provider: provider.to_string(),
        model: model.to_string(),
    }
}
