//! Shared error vocabulary: a scoped, cause-chained error event recorded on a
//! build's stage-error log, plus human-readable rendering.
//!
//! Individual subsystems (the [`router`](crate::router),
//! [`orchestrator`](crate::orchestrator), [`registry`](crate::registry))
//! define their own typed `thiserror` enums for the error taxonomy of
//! `SPEC_FULL.md` §7. Those errors are converted into an [`ErrorEvent`] at
//! the point they are recorded so every subsystem accumulates the same
//! loggable, serializable shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{FormatterMode, PlainFormatter, TelemetryFormatter};

/// A scoped, timestamped error event with a cause chain, tags, and free-form
/// context, ready to be appended to a build's stage-error log or rendered to
/// a terminal/log sink.
///
/// # JSON Serialization Format
///
/// ```json
/// {
///   "when": "2026-07-26T10:30:00Z",
///   "scope": {"scope": "stage", "stage_id": "coding_file", "attempt": 2},
///   "error": {
///     "message": "request timed out",
///     "cause": null,
///     "details": {"provider": "openai"}
///   },
///   "tags": ["retryable"],
///   "context": {"build_id": "b-123"}
/// }
/// ```
///
/// The `scope` field is a tagged union discriminated by `"scope"`:
/// - `"stage"`: requires `stage_id` (string) and `attempt` (u32)
/// - `"router"`: requires `provider` (string)
/// - `"orchestrator"`: requires `build_id` (string)
/// - `"fabric"`: requires `build_id` (string)
/// - `"app"`: no additional fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorEvent {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    #[serde(default)]
    pub error: LadderError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEvent {
    /// Create a stage-scoped error event (the common case: per-attempt
    /// failures recorded on a `StageInstance`'s error log, `SPEC_FULL.md` §7).
    pub fn stage<S: Into<String>>(stage_id: S, attempt: u32, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Stage {
                stage_id: stage_id.into(),
                attempt,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn router<S: Into<String>>(provider: S, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Router {
                provider: provider.into(),
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn orchestrator<S: Into<String>>(build_id: S, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Orchestrator {
                build_id: build_id.into(),
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn fabric<S: Into<String>>(build_id: S, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Fabric {
                build_id: build_id.into(),
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn app(error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::App,
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// True when `tags` marks this event as the stage's final, non-retryable
    /// failure (`isFinalFailure` in `SPEC_FULL.md` §7/§8).
    pub fn is_final_failure(&self) -> bool {
        self.tags.iter().any(|t| t == "final_failure")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    Stage { stage_id: String, attempt: u32 },
    Router { provider: String },
    Orchestrator { build_id: String },
    Fabric { build_id: String },
    #[default]
    App,
}

/// A single node in an error cause chain: a message, optional nested cause,
/// and free-form structured details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LadderError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<LadderError>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Default for LadderError {
    fn default() -> Self {
        LadderError {
            message: String::new(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for LadderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LadderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl LadderError {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        LadderError {
            message: m.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    /// Build a cause chain from any `std::error::Error`, following `.source()`.
    pub fn from_std(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut ladder = LadderError::msg(err.to_string());
        if let Some(source) = err.source() {
            ladder = ladder.with_cause(LadderError::from_std(source));
        }
        ladder
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_cause(mut self, cause: LadderError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Render error events as human-readable text with explicit color control.
pub fn pretty_print_with_mode(events: &[ErrorEvent], mode: FormatterMode) -> String {
    let formatter = PlainFormatter::with_mode(mode);
    let renders = formatter.render_errors(events);
    let mut out = String::new();
    for (idx, render) in renders.into_iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        for line in render.lines {
            out.push_str(&line);
        }
    }
    out
}

/// Render error events as human-readable text, auto-detecting color support.
pub fn pretty_print(events: &[ErrorEvent]) -> String {
    pretty_print_with_mode(events, FormatterMode::Auto)
}
