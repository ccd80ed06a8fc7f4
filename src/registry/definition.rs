use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::schema::PayloadSchema;
use crate::types::{StageId, StageStatus};

/// Default per-stage timeout (`SPEC_FULL.md`/`spec.md` §3: 5 min).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Minimum timeout for a multi-event stage (§4.1: "timeout for multi-event
/// stages >= 60s").
pub const MIN_MULTI_EVENT_TIMEOUT: Duration = Duration::from_secs(60);

/// A catalogue entry in the Stage Registry (`spec.md` §3 "StageDefinition").
///
/// Immutable once registered; shared by value across every build that uses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub label: String,
    pub description: String,
    pub supports_multiple_events: bool,
    pub allowed_statuses: BTreeSet<StageStatus>,
    pub dependencies: Vec<StageId>,
    pub payload_schema: PayloadSchema,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub retryable: bool,
    pub critical: bool,
    pub version: u32,
    pub category: String,
    pub icon: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Resolves Open Question 1 (`DESIGN.md`): `None` for global built-ins,
    /// `Some(tenant)` for custom stages registered by a tenant.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl StageDefinition {
    pub fn builder(id: &str, label: impl Into<String>) -> StageDefinitionBuilder {
        StageDefinitionBuilder::new(id, label)
    }

    pub fn is_global(&self) -> bool {
        self.tenant_id.is_none()
    }

    /// True once `to` is reachable from `from` per the definition's declared
    /// allowed-status set; `PENDING -> RUNNING -> (terminal)` is the only
    /// shape every definition supports (`spec.md` §4.3).
    pub fn can_transition(&self, from: StageStatus, to: StageStatus) -> bool {
        if !self.allowed_statuses.contains(&to) {
            return false;
        }
        match from {
            StageStatus::Pending => to == StageStatus::Running,
            StageStatus::Running => to != StageStatus::Pending,
            _ => false, // terminal statuses never transition further
        }
    }

    pub fn has_completion_status(&self) -> bool {
        self.allowed_statuses
            .iter()
            .any(|s| s.is_success_terminal())
    }
}

/// Builder for [`StageDefinition`], used by both built-ins and custom-stage
/// registration call sites.
pub struct StageDefinitionBuilder {
    def: Result<StageDefinition, String>,
}

impl StageDefinitionBuilder {
    fn new(id: &str, label: impl Into<String>) -> Self {
        let def = StageId::new(id).map(|id| StageDefinition {
            id,
            label: label.into(),
            description: String::new(),
            supports_multiple_events: false,
            allowed_statuses: [StageStatus::Pending, StageStatus::Running]
                .into_iter()
                .collect(),
            dependencies: Vec::new(),
            payload_schema: PayloadSchema::new(),
            timeout: DEFAULT_TIMEOUT,
            retryable: true,
            critical: false,
            version: 1,
            category: "general".to_string(),
            icon: None,
            metadata: serde_json::Value::Null,
            tenant_id: None,
        });
        Self {
            def: def.map_err(|e| e.to_string()),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        if let Ok(def) = &mut self.def {
            def.description = description.into();
        }
        self
    }

    pub fn multi_event(mut self, supports: bool) -> Self {
        if let Ok(def) = &mut self.def {
            def.supports_multiple_events = supports;
        }
        self
    }

    pub fn allowed_statuses(mut self, statuses: impl IntoIterator<Item = StageStatus>) -> Self {
        if let Ok(def) = &mut self.def {
            def.allowed_statuses = [StageStatus::Pending, StageStatus::Running]
                .into_iter()
                .chain(statuses)
                .collect();
        }
        self
    }

    pub fn dependencies(mut self, deps: &[&str]) -> Self {
        if let Ok(def) = &mut self.def {
            match deps.iter().map(|d| StageId::new(*d)).collect::<Result<Vec<_>, _>>() {
                Ok(ids) => def.dependencies = ids,
                Err(e) => self.def = Err(e.to_string()),
            }
        }
        self
    }

    pub fn payload_schema(mut self, schema: PayloadSchema) -> Self {
        if let Ok(def) = &mut self.def {
            def.payload_schema = schema;
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        if let Ok(def) = &mut self.def {
            def.timeout = timeout;
        }
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        if let Ok(def) = &mut self.def {
            def.retryable = retryable;
        }
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        if let Ok(def) = &mut self.def {
            def.critical = critical;
        }
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        if let Ok(def) = &mut self.def {
            def.category = category.into();
        }
        self
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        if let Ok(def) = &mut self.def {
            def.tenant_id = Some(tenant_id.into());
        }
        self
    }

    /// Finishes the builder. Errors here are id-grammar violations only;
    /// the fuller shape/cross-field validation happens in
    /// `StageRegistry::validate_definition` at registration time.
    pub fn build(self) -> Result<StageDefinition, String> {
        self.def
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_valid_pending_running_baseline() {
        let def = StageDefinition::builder("creating_specs", "Creating Specs")
            .allowed_statuses([StageStatus::Done])
            .build()
            .unwrap();
        assert!(def.allowed_statuses.contains(&StageStatus::Pending));
        assert!(def.has_completion_status());
    }

    #[test]
    fn transition_requires_allowed_status() {
        let def = StageDefinition::builder("coding_file", "Coding File")
            .allowed_statuses([StageStatus::Done, StageStatus::Error])
            .build()
            .unwrap();
        assert!(def.can_transition(StageStatus::Pending, StageStatus::Running));
        assert!(def.can_transition(StageStatus::Running, StageStatus::Done));
        assert!(!def.can_transition(StageStatus::Running, StageStatus::Passed));
    }
}
