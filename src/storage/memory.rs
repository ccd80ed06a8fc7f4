//! In-memory `Storage` backend, grounded on the teacher's
//! `InMemoryCheckpointer` (`std::sync::RwLock<FxHashMap<...>>`).

use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::orchestrator::build::{Build, StageEvent};
use crate::storage::errors::StorageError;
use crate::storage::persisted::PersistedDailyMetrics;
use crate::storage::Storage;

/// Non-durable storage backend: the default when no `sqlite`/`postgres`
/// feature is selected, and the backend every integration test runs
/// against (`SPEC_FULL.md` §8).
#[derive(Default)]
pub struct InMemoryStorage {
    builds: RwLock<FxHashMap<String, Build>>,
    events: RwLock<FxHashMap<String, Vec<StageEvent>>>,
    metrics: RwLock<FxHashMap<String, PersistedDailyMetrics>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_build(&self, build: &Build) -> Result<(), StorageError> {
        self.builds
            .write()
            .map_err(|_| StorageError::backend("build lock poisoned"))?
            .insert(build.id.clone(), build.clone());
        Ok(())
    }

    async fn load_build(&self, build_id: &str) -> Result<Option<Build>, StorageError> {
        Ok(self
            .builds
            .read()
            .map_err(|_| StorageError::backend("build lock poisoned"))?
            .get(build_id)
            .cloned())
    }

    async fn list_builds(&self, user_id: &str) -> Result<Vec<Build>, StorageError> {
        let mut builds: Vec<Build> = self
            .builds
            .read()
            .map_err(|_| StorageError::backend("build lock poisoned"))?
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        builds.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(builds)
    }

    async fn delete_build(&self, build_id: &str) -> Result<(), StorageError> {
        self.builds
            .write()
            .map_err(|_| StorageError::backend("build lock poisoned"))?
            .remove(build_id);
        self.events
            .write()
            .map_err(|_| StorageError::backend("event lock poisoned"))?
            .remove(build_id);
        Ok(())
    }

    async fn append_event(&self, build_id: &str, event: &StageEvent) -> Result<(), StorageError> {
        self.events
            .write()
            .map_err(|_| StorageError::backend("event lock poisoned"))?
            .entry(build_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn load_events(&self, build_id: &str) -> Result<Vec<StageEvent>, StorageError> {
        Ok(self
            .events
            .read()
            .map_err(|_| StorageError::backend("event lock poisoned"))?
            .get(build_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_daily_metrics(&self, metrics: &PersistedDailyMetrics) -> Result<(), StorageError> {
        self.metrics
            .write()
            .map_err(|_| StorageError::backend("metrics lock poisoned"))?
            .insert(metrics.date.clone(), metrics.clone());
        Ok(())
    }

    async fn load_daily_metrics(&self, date: &str) -> Result<Option<PersistedDailyMetrics>, StorageError> {
        Ok(self
            .metrics
            .read()
            .map_err(|_| StorageError::backend("metrics lock poisoned"))?
            .get(date)
            .cloned())
    }
}
