//! The outbound event envelope delivered over the push channel (`SPEC_FULL.md`
//! §6): `pipeline_update | stage_update | pipeline_complete | pipeline_error`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminant for [`EventEnvelope`], matching the wire `"type"` field.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PipelineUpdate,
    StageUpdate,
    PipelineComplete,
    PipelineError,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::PipelineUpdate => "pipeline_update",
            EventKind::StageUpdate => "stage_update",
            EventKind::PipelineComplete => "pipeline_complete",
            EventKind::PipelineError => "pipeline_error",
        }
    }
}

/// One event delivered to subscribers of a build's stream.
///
/// Mirrors the wire envelope of `SPEC_FULL.md` §6 exactly:
/// `{type, pipelineId, stage?, status?, message, timestamp, details?}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "pipelineId")]
    pub pipeline_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl EventEnvelope {
    pub fn pipeline_update(pipeline_id: impl Into<String>, status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::PipelineUpdate,
            pipeline_id: pipeline_id.into(),
            stage: None,
            status: Some(status.into()),
            message: message.into(),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    pub fn stage_update(
        pipeline_id: impl Into<String>,
        stage: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::StageUpdate,
            pipeline_id: pipeline_id.into(),
            stage: Some(stage.into()),
            status: Some(status.into()),
            message: message.into(),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    pub fn pipeline_complete(pipeline_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            kind: EventKind::PipelineComplete,
            pipeline_id: pipeline_id.into(),
            stage: None,
            status: Some(status.into()),
            message: "build reached a terminal state".to_string(),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    pub fn pipeline_error(pipeline_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::PipelineError,
            pipeline_id: pipeline_id.into(),
            stage: None,
            status: None,
            message: message.into(),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn scope_label(&self) -> &str {
        self.kind.as_str()
    }

    /// Approximate wire size in bytes, used by the replay buffer's byte bound.
    pub fn approx_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.stage, &self.status) {
            (Some(stage), Some(status)) => {
                write!(f, "[{}@{stage}:{status}] {}", self.pipeline_id, self.message)
            }
            (None, Some(status)) => write!(f, "[{}:{status}] {}", self.pipeline_id, self.message),
            _ => write!(f, "[{}] {}", self.pipeline_id, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_update_round_trips_through_json() {
        let ev = EventEnvelope::stage_update("b-1", "coding_file", "RUNNING", "generating main.rs");
        let json = ev.to_json_string().unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ev);
        assert!(json.contains("\"type\":\"stage_update\""));
    }

    #[test]
    fn pipeline_complete_has_no_stage() {
        let ev = EventEnvelope::pipeline_complete("b-1", "COMPLETED");
        assert!(ev.stage.is_none());
        assert_eq!(ev.kind, EventKind::PipelineComplete);
    }
}
