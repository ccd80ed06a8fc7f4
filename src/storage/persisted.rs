//! Pure-data DTOs for the abstract persisted-state layout of `spec.md` §6
//! (`build:{id}`, `build:{id}:stage:{stageId}`, `build:{id}:events`,
//! `metrics:{date}`), adapted from the teacher's `runtimes::persistence`
//! decoupling of domain types from their on-disk shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::build::{Build, StageEvent, StageInstance};
use crate::storage::errors::StorageError;

/// On-disk shape of `build:{id}`. Structurally identical to [`Build`] today;
/// kept as a distinct type so the wire format can diverge from the in-memory
/// representation without touching orchestrator code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBuild(pub Build);

impl From<&Build> for PersistedBuild {
    fn from(build: &Build) -> Self {
        PersistedBuild(build.clone())
    }
}

impl TryFrom<PersistedBuild> for Build {
    type Error = StorageError;

    fn try_from(value: PersistedBuild) -> Result<Self, Self::Error> {
        Ok(value.0)
    }
}

/// On-disk shape of `build:{id}:stage:{stageId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStageInstance(pub StageInstance);

impl From<&StageInstance> for PersistedStageInstance {
    fn from(stage: &StageInstance) -> Self {
        PersistedStageInstance(stage.clone())
    }
}

impl TryFrom<PersistedStageInstance> for StageInstance {
    type Error = StorageError;

    fn try_from(value: PersistedStageInstance) -> Result<Self, Self::Error> {
        Ok(value.0)
    }
}

/// One row of `build:{id}:events`, the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEventLogEntry {
    pub build_id: String,
    pub event: StageEvent,
}

/// On-disk shape of `metrics:{date}`: the daily rolling counters the Metrics
/// & Audit Collector folds events into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedDailyMetrics {
    pub date: String,
    pub total_builds: u64,
    pub succeeded_builds: u64,
    pub failed_builds: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub rate_limit_hits: u64,
    pub circuit_trips: u64,
}

/// Last-write timestamp recorded alongside every persisted record, useful for
/// backends that don't track it natively (`InMemoryStorage`).
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
