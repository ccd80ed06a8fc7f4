//! Durable persistence for build/stage/event state (`SPEC_FULL.md` §2, §6),
//! directly grounded on the teacher's `runtimes::checkpointer::Checkpointer`
//! trait: a small async contract with `InMemory`, `Sqlite`, and `Postgres`
//! implementations behind the `sqlite`/`postgres` Cargo features.

pub mod errors;
mod memory;
pub mod persisted;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use errors::StorageError;
pub use memory::InMemoryStorage;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;

use crate::orchestrator::build::{Build, StageEvent};
use crate::storage::persisted::PersistedDailyMetrics;

/// The storage collaborator (`spec.md` §6 "Persisted state layout"): writes
/// are the system of record, in-memory state is a cache (`spec.md` §4.3).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upserts `build:{id}`. The Orchestrator calls this at every state
    /// transition; implementations must make a single call durable before
    /// returning.
    async fn save_build(&self, build: &Build) -> Result<(), StorageError>;

    async fn load_build(&self, build_id: &str) -> Result<Option<Build>, StorageError>;

    /// Builds owned by `user_id`, for `GET /pipelines` (`spec.md` §6).
    async fn list_builds(&self, user_id: &str) -> Result<Vec<Build>, StorageError>;

    async fn delete_build(&self, build_id: &str) -> Result<(), StorageError>;

    /// Appends to `build:{id}:events`, the append-only log.
    async fn append_event(&self, build_id: &str, event: &StageEvent) -> Result<(), StorageError>;

    async fn load_events(&self, build_id: &str) -> Result<Vec<StageEvent>, StorageError>;

    /// Upserts `metrics:{date}`.
    async fn save_daily_metrics(&self, metrics: &PersistedDailyMetrics) -> Result<(), StorageError>;

    async fn load_daily_metrics(&self, date: &str) -> Result<Option<PersistedDailyMetrics>, StorageError>;
}
