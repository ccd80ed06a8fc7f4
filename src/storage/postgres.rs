//! Postgres-backed `Storage`, grounded on the teacher's
//! `PostgresCheckpointer` (`runtimes::checkpointer_postgres`): same
//! whole-record-JSON shape as [`super::sqlite::SqliteStorage`], `$n`
//! placeholders and a separate migrations directory.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::orchestrator::build::{Build, StageEvent};
use crate::storage::errors::StorageError;
use crate::storage::persisted::PersistedDailyMetrics;
use crate::storage::Storage;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl std::fmt::Debug for PostgresStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStorage").finish()
    }
}

impl PostgresStorage {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StorageError::backend(format!("connect error: {e}")))?;

        #[cfg(feature = "postgres-migrations")]
        {
            sqlx::migrate!("./migrations/postgres")
                .run(&pool)
                .await
                .map_err(|e| StorageError::backend(format!("migration failure: {e}")))?;
        }

        Ok(Self { pool: Arc::new(pool) })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    #[instrument(skip(self, build), err)]
    async fn save_build(&self, build: &Build) -> Result<(), StorageError> {
        let json = serde_json::to_value(build)?;
        sqlx::query(
            "INSERT INTO builds (id, user_id, build_json, updated_at) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET user_id = excluded.user_id, build_json = excluded.build_json, updated_at = excluded.updated_at",
        )
        .bind(&build.id)
        .bind(&build.user_id)
        .bind(&json)
        .bind(chrono::Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| StorageError::backend(format!("save_build: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_build(&self, build_id: &str) -> Result<Option<Build>, StorageError> {
        let row = sqlx::query("SELECT build_json FROM builds WHERE id = $1")
            .bind(build_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| StorageError::backend(format!("load_build: {e}")))?;
        match row {
            Some(row) => {
                let json: serde_json::Value = row.get("build_json");
                Ok(Some(serde_json::from_value(json)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_builds(&self, user_id: &str) -> Result<Vec<Build>, StorageError> {
        let rows = sqlx::query("SELECT build_json FROM builds WHERE user_id = $1 ORDER BY updated_at ASC")
            .bind(user_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| StorageError::backend(format!("list_builds: {e}")))?;
        rows.into_iter()
            .map(|row| {
                let json: serde_json::Value = row.get("build_json");
                serde_json::from_value(json).map_err(StorageError::from)
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_build(&self, build_id: &str) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::backend(format!("tx begin: {e}")))?;
        sqlx::query("DELETE FROM builds WHERE id = $1")
            .bind(build_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::backend(format!("delete build: {e}")))?;
        sqlx::query("DELETE FROM build_events WHERE build_id = $1")
            .bind(build_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::backend(format!("delete events: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StorageError::backend(format!("tx commit: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self, event), err)]
    async fn append_event(&self, build_id: &str, event: &StageEvent) -> Result<(), StorageError> {
        let json = serde_json::to_value(event)?;
        let next_seq: i64 = sqlx::query("SELECT COALESCE(MAX(seq), -1) + 1 as next_seq FROM build_events WHERE build_id = $1")
            .bind(build_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| StorageError::backend(format!("next_seq: {e}")))?
            .get("next_seq");
        sqlx::query("INSERT INTO build_events (build_id, seq, event_json) VALUES ($1, $2, $3)")
            .bind(build_id)
            .bind(next_seq)
            .bind(&json)
            .execute(&*self.pool)
            .await
            .map_err(|e| StorageError::backend(format!("append_event: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_events(&self, build_id: &str) -> Result<Vec<StageEvent>, StorageError> {
        let rows = sqlx::query("SELECT event_json FROM build_events WHERE build_id = $1 ORDER BY seq ASC")
            .bind(build_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| StorageError::backend(format!("load_events: {e}")))?;
        rows.into_iter()
            .map(|row| {
                let json: serde_json::Value = row.get("event_json");
                serde_json::from_value(json).map_err(StorageError::from)
            })
            .collect()
    }

    #[instrument(skip(self, metrics), err)]
    async fn save_daily_metrics(&self, metrics: &PersistedDailyMetrics) -> Result<(), StorageError> {
        let json = serde_json::to_value(metrics)?;
        sqlx::query(
            "INSERT INTO daily_metrics (date, metrics_json) VALUES ($1, $2)
             ON CONFLICT (date) DO UPDATE SET metrics_json = excluded.metrics_json",
        )
        .bind(&metrics.date)
        .bind(&json)
        .execute(&*self.pool)
        .await
        .map_err(|e| StorageError::backend(format!("save_daily_metrics: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_daily_metrics(&self, date: &str) -> Result<Option<PersistedDailyMetrics>, StorageError> {
        let row = sqlx::query("SELECT metrics_json FROM daily_metrics WHERE date = $1")
            .bind(date)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| StorageError::backend(format!("load_daily_metrics: {e}")))?;
        match row {
            Some(row) => {
                let json: serde_json::Value = row.get("metrics_json");
                Ok(Some(serde_json::from_value(json)?))
            }
            None => Ok(None),
        }
    }
}
