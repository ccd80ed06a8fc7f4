//! Storage error taxonomy, directly grounded on the teacher's
//! `CheckpointerError` (`spec.md` §7: "StorageError").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("build {0} not found")]
    NotFound(String),

    #[error("storage backend error: {message}")]
    Backend { message: String },

    #[error("storage error: {message}")]
    Other { message: String },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend { message: message.into() }
    }

    pub fn other(message: impl Into<String>) -> Self {
        StorageError::Other { message: message.into() }
    }

    /// `spec.md` §7: "write failures on terminal transitions are fatal ...
    /// read failures fall back to in-memory state for non-critical paths".
    /// The orchestrator consults this to decide whether a storage failure on
    /// a read should be tolerated.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound("<unspecified>".to_string()),
            other => StorageError::Backend { message: other.to_string() },
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Other { message: err.to_string() }
    }
}
