//! The stage execution contract (`spec.md` §4.3 step 2): given a context, do
//! the stage's work and report what happened.

use async_trait::async_trait;

use crate::orchestrator::build::Artifact;
use crate::types::StageStatus;

use super::context::StageContext;
use super::errors::StageError;

/// What a handler reports back after one attempt. `status` must be one of
/// the stage's `allowed_statuses` — the orchestrator rejects the attempt
/// otherwise rather than guessing at a fallback.
pub struct StageOutcome {
    pub status: StageStatus,
    pub artifacts: Vec<Artifact>,
}

impl StageOutcome {
    pub fn new(status: StageStatus) -> Self {
        Self {
            status,
            artifacts: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn execute(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageError>;
}
