//! Task/response shapes exchanged with the Model Router (`spec.md` §4.2).

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Archetype of work a stage needs from an LLM (`spec.md` GLOSSARY: "Role").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Interviewer,
    Planner,
    SchemaDesigner,
    Coder,
    Tester,
    Debugger,
    Reviewer,
    Deployer,
}

impl AgentRole {
    pub const ALL: &'static [AgentRole] = &[
        AgentRole::Interviewer,
        AgentRole::Planner,
        AgentRole::SchemaDesigner,
        AgentRole::Coder,
        AgentRole::Tester,
        AgentRole::Debugger,
        AgentRole::Reviewer,
        AgentRole::Deployer,
    ];

    /// Maps a task-type keyword to a role for the agent-role assignment
    /// façade (`spec.md` §4.2: "declared keyword similarity").
    pub fn from_task_type(task_type: &str) -> Option<Self> {
        let lower = task_type.to_ascii_lowercase();
        let table: &[(&str, AgentRole)] = &[
            ("interview", AgentRole::Interviewer),
            ("clarify", AgentRole::Interviewer),
            ("plan", AgentRole::Planner),
            ("schema", AgentRole::SchemaDesigner),
            ("code", AgentRole::Coder),
            ("generat", AgentRole::Coder),
            ("test", AgentRole::Tester),
            ("debug", AgentRole::Debugger),
            ("fix", AgentRole::Debugger),
            ("review", AgentRole::Reviewer),
            ("deploy", AgentRole::Deployer),
        ];
        table
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
            .map(|(_, role)| *role)
    }
}

/// Complexity hint biasing provider selection toward higher-capability
/// providers (`spec.md` §4.2 step 3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    /// Multiplier applied to a provider's base weight; favors providers with
    /// an above-average reliability/cost ratio as complexity rises. Kept as
    /// a simple staged multiplier rather than a continuous function, since
    /// the spec only names three bands.
    pub fn weight_factor(self) -> f64 {
        match self {
            Complexity::Low => 1.0,
            Complexity::Medium => 1.0,
            Complexity::High => 1.15,
        }
    }
}

/// A unit of work submitted to `route_task`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterTask {
    pub role: AgentRole,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub context: serde_json::Value,
    pub correlation_id: Option<String>,
    #[serde(default = "default_true")]
    pub fallback_allowed: bool,
}

fn default_true() -> bool {
    true
}

impl RouterTask {
    pub fn new(role: AgentRole, messages: Vec<Message>) -> Self {
        Self {
            role,
            messages,
            complexity: Complexity::default(),
            context: serde_json::Value::Null,
            correlation_id: None,
            fallback_allowed: true,
        }
    }

    #[must_use]
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Zero-length prompt is a client error that never reaches a provider
    /// (`spec.md` §8 Boundary).
    pub fn is_empty_prompt(&self) -> bool {
        self.messages.iter().all(|m| m.content.trim().is_empty())
    }
}

/// Token accounting for one completed call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(self) -> u64 {
        self.input + self.output
    }
}

/// Result of a successful `route_task` call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterResponse {
    pub content: String,
    pub tokens: TokenUsage,
    pub cost: f64,
    pub latency_ms: u64,
    pub provider: String,
    pub model: String,
}

/// One chunk of a streamed response (`spec.md` §4.2 `stream`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content_chunk: String,
    pub tokens_so_far: u64,
    pub done: bool,
}

/// Terminal record closing a stream, carrying full metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamSummary {
    pub tokens: TokenUsage,
    pub cost: f64,
    pub latency_ms: u64,
    pub chunk_count: u64,
    pub provider: String,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_keyword_mapping_matches_common_task_types() {
        assert_eq!(AgentRole::from_task_type("code-generation"), Some(AgentRole::Coder));
        assert_eq!(AgentRole::from_task_type("test-generation"), Some(AgentRole::Tester));
        assert_eq!(AgentRole::from_task_type("unknown-thing"), None);
    }

    #[test]
    fn empty_prompt_is_detected() {
        let task = RouterTask::new(AgentRole::Coder, vec![Message::user("   ")]);
        assert!(task.is_empty_prompt());
        let task = RouterTask::new(AgentRole::Coder, vec![Message::user("write code")]);
        assert!(!task.is_empty_prompt());
    }
}
