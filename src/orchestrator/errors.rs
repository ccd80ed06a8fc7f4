//! Orchestrator error taxonomy (`spec.md` §7), plus the `retryable()`/
//! `fast_fail()` classifier the execution loop calls instead of matching on
//! variants ad hoc.

use thiserror::Error;

use crate::router::RouterError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("stage {stage_id} exceeded its timeout of {timeout_secs}s")]
    StageTimeout { stage_id: String, timeout_secs: u64 },

    #[error("build was cancelled")]
    Cancelled,

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("stage handler failed: {0}")]
    HandlerFailed(String),

    #[error("payload for stage {stage_id} failed validation: {errors:?}")]
    InvalidPayload { stage_id: String, errors: Vec<String> },
}

impl OrchestratorError {
    /// Retryable per `spec.md` §7's taxonomy (everything except the
    /// inherently-terminal or client-error kinds).
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Cancelled | OrchestratorError::InvalidPayload { .. } => false,
            OrchestratorError::StageTimeout { .. } => true,
            OrchestratorError::Router(err) => !err.is_fast_fail(),
            OrchestratorError::Storage(_) => false,
            OrchestratorError::HandlerFailed(_) => true,
        }
    }

    pub fn is_fast_fail(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Cancelled | OrchestratorError::InvalidPayload { .. }
        ) || matches!(self, OrchestratorError::Router(err) if err.is_fast_fail())
    }

    /// A concise, user-facing message per `spec.md` §7: `"stage <label>
    /// failed after <N> attempts: <categorized reason>"`.
    pub fn user_message(&self, stage_label: &str, attempts: u32) -> String {
        format!("stage {stage_label} failed after {attempts} attempts: {self}")
    }

    /// The recommended action surfaced alongside the error (`spec.md` §7).
    pub fn recommended_action(&self) -> Option<&'static str> {
        match self {
            OrchestratorError::Router(RouterError::FallbackExhausted { .. }) => {
                Some("retry with alternative model")
            }
            OrchestratorError::Storage(_) => Some("contact support"),
            _ => None,
        }
    }
}
