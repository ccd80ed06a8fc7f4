//! Core domain types shared across the pipeline: stage identifiers, the
//! build/stage status alphabets, and artifact kinds.
//!
//! These are the fundamental vocabulary the rest of the crate is built on.
//! For provider/role types see [`crate::router::task`]; for build/stage
//! records see [`crate::orchestrator::build`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a stage, either a canonical built-in or a registered custom one.
///
/// `StageId` round-trips through persistence the same way the routing
/// identifiers elsewhere in this crate do: a human-readable encoded string
/// form that is forward-compatible with unrecognized input.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(String);

/// Error returned when a candidate stage id string violates the id grammar:
/// lowercase ASCII alphanumerics plus `_` and `-`, non-empty.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid stage id {0:?}: must be non-empty lowercase alphanumeric, '_' or '-'")]
pub struct InvalidStageId(pub String);

impl StageId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidStageId> {
        let raw = raw.into();
        if raw.is_empty()
            || !raw
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(InvalidStageId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn encode(&self) -> String {
        self.0.clone()
    }

    /// Decode a persisted string form. Forward-compatible: invalid legacy
    /// strings are lossily coerced rather than rejected, since this is used
    /// on the read path of storage already known to have accepted the value.
    pub fn decode(s: &str) -> Self {
        Self(s.to_ascii_lowercase())
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StageId {
    /// Infallible conversion for call sites that already know the literal is
    /// valid (built-in stage ids, tests). Prefer [`StageId::new`] for
    /// user-supplied input.
    fn from(s: &str) -> Self {
        StageId::new(s).unwrap_or_else(|_| panic!("invalid built-in stage id literal: {s:?}"))
    }
}

/// Overall status of a [`Build`](crate::orchestrator::build::Build).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Completed | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Pending => "PENDING",
            BuildStatus::Running => "RUNNING",
            BuildStatus::Completed => "COMPLETED",
            BuildStatus::Failed => "FAILED",
            BuildStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// The global stage-status alphabet. Every [`StageDefinition`](crate::registry::StageDefinition)
/// declares a subset of these as its allowed transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Created,
    Passed,
    Failed,
    Error,
    Cancelled,
    Pushed,
    Deployed,
    /// Supplemented status (see `SPEC_FULL.md` §3 / `DESIGN.md` Open Question 4):
    /// a multi-event stage that produced some but not all of its sub-events
    /// successfully before the build moved on.
    Partial,
}

impl StageStatus {
    /// Statuses that count as "completed successfully" for dependency-readiness
    /// checks (spec.md §3: "at least one completion status").
    pub const COMPLETION_STATUSES: &'static [StageStatus] = &[
        StageStatus::Done,
        StageStatus::Created,
        StageStatus::Passed,
        StageStatus::Deployed,
    ];

    pub fn is_success_terminal(self) -> bool {
        Self::COMPLETION_STATUSES.contains(&self) || matches!(self, StageStatus::Pushed)
    }

    pub fn is_terminal(self) -> bool {
        self.is_success_terminal()
            || matches!(
                self,
                StageStatus::Error | StageStatus::Cancelled | StageStatus::Partial
            )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Running => "RUNNING",
            StageStatus::Done => "DONE",
            StageStatus::Created => "CREATED",
            StageStatus::Passed => "PASSED",
            StageStatus::Failed => "FAILED",
            StageStatus::Error => "ERROR",
            StageStatus::Cancelled => "CANCELLED",
            StageStatus::Pushed => "PUSHED",
            StageStatus::Deployed => "DEPLOYED",
            StageStatus::Partial => "PARTIAL",
        };
        write!(f, "{s}")
    }
}

/// Category of an [`Artifact`](crate::orchestrator::build::Artifact).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Repository,
    Deployment,
    S3,
    Database,
    Lambda,
    Api,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::Repository => "REPOSITORY",
            ArtifactKind::Deployment => "DEPLOYMENT",
            ArtifactKind::S3 => "S3",
            ArtifactKind::Database => "DATABASE",
            ArtifactKind::Lambda => "LAMBDA",
            ArtifactKind::Api => "API",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_id_rejects_invalid_chars() {
        assert!(StageId::new("creating_files").is_ok());
        assert!(StageId::new("Creating-Files").is_err());
        assert!(StageId::new("").is_err());
        assert!(StageId::new("has space").is_err());
    }

    #[test]
    fn stage_id_round_trips_through_encode_decode() {
        let id = StageId::new("creating_schema").unwrap();
        assert_eq!(StageId::decode(&id.encode()), id);
    }

    #[test]
    fn build_status_terminal_classification() {
        assert!(!BuildStatus::Running.is_terminal());
        assert!(BuildStatus::Completed.is_terminal());
        assert!(BuildStatus::Cancelled.is_terminal());
    }

    #[test]
    fn stage_status_completion_set_matches_spec() {
        assert!(StageStatus::Done.is_success_terminal());
        assert!(StageStatus::Created.is_success_terminal());
        assert!(StageStatus::Passed.is_success_terminal());
        assert!(StageStatus::Deployed.is_success_terminal());
        assert!(!StageStatus::Running.is_success_terminal());
    }
}
