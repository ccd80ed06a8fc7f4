//! Model Router error taxonomy (`SPEC_FULL.md` §7).

use thiserror::Error;

/// One provider attempt recorded inside a [`RouterError::FallbackExhausted`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub model: String,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("prompt is empty and was never sent to a provider")]
    EmptyPrompt,

    #[error("no provider registered for role {0:?}")]
    NoProviderForRole(crate::router::task::AgentRole),

    #[error("provider {provider} rejected the request: {message}")]
    Authentication { provider: String, message: String },

    #[error("provider {provider} is rate limited; retry after {retry_after_secs}s")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    #[error("provider {provider} request timed out")]
    Timeout { provider: String },

    #[error("provider {provider} is unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("provider {provider} connection was reset")]
    ConnectionReset { provider: String },

    #[error("all eligible providers failed for role {role:?}: {attempts:?}")]
    FallbackExhausted {
        role: crate::router::task::AgentRole,
        attempts: Vec<AttemptRecord>,
    },

    #[error("role {0:?} is at its concurrent-load cap")]
    RoleOverloaded(crate::router::task::AgentRole),

    #[error("mid-stream failure from provider {provider}: {message}")]
    StreamFailed { provider: String, message: String },
}

impl RouterError {
    /// Fast-fail: never retried, never falls back with the same credentials
    /// (`spec.md` §4.2 call contract).
    pub fn is_fast_fail(&self) -> bool {
        matches!(self, RouterError::Authentication { .. } | RouterError::EmptyPrompt)
    }

    /// Retryable per `spec.md` §7's taxonomy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::Timeout { .. }
                | RouterError::ProviderUnavailable { .. }
                | RouterError::ConnectionReset { .. }
                | RouterError::RateLimited { .. }
        )
    }

    pub fn provider_name(&self) -> Option<&str> {
        match self {
            RouterError::Authentication { provider, .. }
            | RouterError::RateLimited { provider, .. }
            | RouterError::Timeout { provider }
            | RouterError::ProviderUnavailable { provider, .. }
            | RouterError::ConnectionReset { provider }
            | RouterError::StreamFailed { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

impl From<&RouterError> for crate::errors::LadderError {
    fn from(err: &RouterError) -> Self {
        crate::errors::LadderError::msg(err.to_string())
    }
}
