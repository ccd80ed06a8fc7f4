use std::fmt;
use thiserror::Error;

use super::event::EventEnvelope;

/// Abstract publish side of a build's event channel; orchestrator stage
/// execution holds one of these and never touches the hub directly.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    fn emit(&self, event: EventEnvelope) -> Result<(), EmitterError>;
}

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event channel closed")]
    Closed,
    #[error("event lag exceeded buffer; dropped {0} messages")]
    Lagged(usize),
    #[error("event emission failed: {0}")]
    Other(String),
}

impl EmitterError {
    pub fn other(error: impl Into<String>) -> Self {
        Self::Other(error.into())
    }
}
