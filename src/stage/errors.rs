//! The stage handler's own error vocabulary — narrower than
//! [`crate::orchestrator::errors::OrchestratorError`], since a handler only
//! ever raises "the router failed", "I was asked to stop", or "my own logic
//! failed" (`spec.md` §7: "Handlers raise typed errors. The orchestrator
//! categorizes and decides retry vs. surface.").

use thiserror::Error;

use crate::router::RouterError;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("{0}")]
    Handler(String),

    #[error("stage observed cancellation at an await boundary")]
    Cancelled,
}
