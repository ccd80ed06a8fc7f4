//! Build-scoped records: `Build`, `StageInstance`, `StageEvent`, `Artifact`
//! (`spec.md` §3). Per Design Note in §9, cyclic references are broken: the
//! build owns its stages and artifacts by value; events and router
//! accounting records carry only ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorEvent;
use crate::types::{ArtifactKind, BuildStatus, StageId, StageStatus};

/// One sub-event within a multi-event stage (`GLOSSARY`: "Sub-event").
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageEvent {
    pub id: String,
    pub stage_id: StageId,
    pub message: String,
    pub status: StageStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl StageEvent {
    pub fn new(stage_id: StageId, message: impl Into<String>, status: StageStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stage_id,
            message: message.into(),
            status,
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A deployable/produced resource (`spec.md` §3 "Artifact/Resource").
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Error returned when an artifact's URL doesn't parse per its kind's
/// convention (`spec.md` §3: "repository must parse as `host/{owner}/{repo}`
/// where host is a known set").
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ArtifactUrlError {
    #[error("repository url {0:?} must be host/{{owner}}/{{repo}} with a known host")]
    MalformedRepository(String),
    #[error("artifact url must not be empty")]
    Empty,
}

const KNOWN_REPOSITORY_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];

impl Artifact {
    pub fn new(kind: ArtifactKind, name: impl Into<String>, url: impl Into<String>) -> Result<Self, ArtifactUrlError> {
        let url = url.into();
        Self::validate_url(kind, &url)?;
        Ok(Self {
            kind,
            name: name.into(),
            url,
            metadata: serde_json::Value::Null,
        })
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn validate_url(kind: ArtifactKind, url: &str) -> Result<(), ArtifactUrlError> {
        if url.trim().is_empty() {
            return Err(ArtifactUrlError::Empty);
        }
        if kind == ArtifactKind::Repository {
            let parts: Vec<&str> = url.trim_start_matches('/').splitn(3, '/').collect();
            let valid = parts.len() == 3
                && KNOWN_REPOSITORY_HOSTS.contains(&parts[0])
                && !parts[1].is_empty()
                && !parts[2].is_empty();
            if !valid {
                return Err(ArtifactUrlError::MalformedRepository(url.to_string()));
            }
        }
        Ok(())
    }
}

/// A stage's runtime state within one build (`spec.md` §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageInstance {
    pub stage_id: StageId,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<StageEvent>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub terminal_error: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl StageInstance {
    pub fn new(stage_id: StageId, max_attempts: u32) -> Self {
        Self {
            stage_id,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            events: Vec::new(),
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            terminal_error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn mark_running(&mut self) {
        self.status = StageStatus::Running;
        self.started_at.get_or_insert(Utc::now());
        self.attempt_count += 1;
    }

    pub fn mark_terminal(&mut self, status: StageStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn push_event(&mut self, event: StageEvent) {
        self.events.push(event);
    }

    /// `spec.md` §3 invariant: `attemptCount <= retries + 1`.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// A build's full record (`spec.md` §3 "Build"): the orchestrator's system
/// of record, persisted through the storage collaborator at every
/// transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Build {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub status: BuildStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageInstance>,
    pub artifacts: Vec<Artifact>,
    pub terminal_error: Option<String>,
    #[serde(default)]
    pub stage_errors: Vec<ErrorEvent>,
    pub spec: serde_json::Value,
}

impl Build {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>, user_id: impl Into<String>, spec: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            status: BuildStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            stages: Vec::new(),
            artifacts: Vec::new(),
            terminal_error: None,
            stage_errors: Vec::new(),
            spec,
        }
    }

    pub fn stage_mut(&mut self, id: &StageId) -> Option<&mut StageInstance> {
        self.stages.iter_mut().find(|s| &s.stage_id == id)
    }

    pub fn stage(&self, id: &StageId) -> Option<&StageInstance> {
        self.stages.iter().find(|s| &s.stage_id == id)
    }

    /// Sets progress, enforcing the §3 invariant that it is monotonically
    /// non-decreasing while the build is non-terminal.
    pub fn set_progress(&mut self, progress: u8) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn mark_running(&mut self) {
        self.status = BuildStatus::Running;
        self.started_at.get_or_insert(Utc::now());
    }

    /// Transitions to a terminal state, setting `completedAt` and clamping
    /// `progress` per §3: 100 on completion, last observed value otherwise.
    pub fn mark_terminal(&mut self, status: BuildStatus, error: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.terminal_error = error;
        if status == BuildStatus::Completed {
            self.progress = 100;
        }
    }

    pub fn record_error(&mut self, event: ErrorEvent) {
        self.stage_errors.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_artifact_requires_known_host() {
        assert!(Artifact::new(ArtifactKind::Repository, "repo", "github.com/acme/widgets").is_ok());
        assert!(Artifact::new(ArtifactKind::Repository, "repo", "evilhost.io/acme/widgets").is_err());
        assert!(Artifact::new(ArtifactKind::Repository, "repo", "github.com/acme").is_err());
    }

    #[test]
    fn build_progress_never_decreases_while_non_terminal() {
        let mut build = Build::new("b-1", "p-1", "u-1", serde_json::json!({}));
        build.mark_running();
        build.set_progress(40);
        build.set_progress(10);
        assert_eq!(build.progress, 40);
    }

    #[test]
    fn completed_build_progress_is_100() {
        let mut build = Build::new("b-1", "p-1", "u-1", serde_json::json!({}));
        build.mark_running();
        build.set_progress(83);
        build.mark_terminal(BuildStatus::Completed, None);
        assert_eq!(build.progress, 100);
    }

    #[test]
    fn failed_build_keeps_last_progress() {
        let mut build = Build::new("b-1", "p-1", "u-1", serde_json::json!({}));
        build.mark_running();
        build.set_progress(55);
        build.mark_terminal(BuildStatus::Failed, Some("boom".to_string()));
        assert_eq!(build.progress, 55);
    }

    #[test]
    fn terminal_build_is_immutable_to_further_transitions() {
        let mut build = Build::new("b-1", "p-1", "u-1", serde_json::json!({}));
        build.mark_running();
        build.mark_terminal(BuildStatus::Completed, None);
        build.mark_terminal(BuildStatus::Failed, Some("late".to_string()));
        assert_eq!(build.status, BuildStatus::Completed);
        assert!(build.terminal_error.is_none());
    }

    #[test]
    fn attempt_budget_is_enforced() {
        let mut stage = StageInstance::new(StageId::new("coding_file").unwrap(), 3);
        assert!(!stage.attempts_exhausted());
        stage.mark_running();
        stage.mark_running();
        stage.mark_running();
        assert!(stage.attempts_exhausted());
    }
}
