//! Stage Registry: the catalogue of stage definitions, their dependency
//! graph, and payload validation (`SPEC_FULL.md` §4.1).

mod builtins;
mod definition;
mod errors;
mod schema;

pub use builtins::canonical_definitions;
pub use definition::{StageDefinition, StageDefinitionBuilder, DEFAULT_TIMEOUT, MIN_MULTI_EVENT_TIMEOUT};
pub use errors::RegistryError;
pub use schema::{FieldConstraints, FieldSchema, FieldType, PayloadSchema};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{StageId, StageStatus};

/// A fresh per-build instantiation of a [`StageDefinition`], returned by
/// [`StageRegistry::instance_for`]. Orchestrator code turns this into the
/// richer `orchestrator::build::StageInstance` that also carries events and
/// artifacts; this is just the registry's view of "a stage about to start".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInstanceSeed {
    pub stage_id: StageId,
    pub status: StageStatus,
    pub max_attempts: u32,
}

/// Immutable-after-init catalogue of stage definitions, safe for concurrent
/// reads from every build's orchestrator context (`SPEC_FULL.md` §5: "no
/// global singletons beyond the Stage Registry and Model Router").
#[derive(Debug, Default)]
pub struct StageRegistry {
    definitions: RwLock<FxHashMap<StageId, StageDefinition>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry pre-loaded with the canonical built-in pipeline.
    /// Per `spec.md` §4.1: "registry init fails if any definition is
    /// invalid" — a panic here means the built-ins themselves are broken,
    /// which is a programmer error, not a runtime condition callers handle.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for def in canonical_definitions() {
            registry
                .register(def)
                .expect("built-in stage definitions must be valid");
        }
        registry
    }

    /// Validates and inserts a stage definition. Fails with
    /// [`RegistryError::InvalidDefinition`] carrying every violation found.
    pub fn register(&self, def: StageDefinition) -> Result<(), RegistryError> {
        let shape_errors = self.validate_definition(&def);
        if !shape_errors.is_empty() {
            return Err(RegistryError::InvalidDefinition {
                id: def.id.clone(),
                errors: shape_errors,
            });
        }

        let mut guard = self.definitions.write();
        if guard.contains_key(&def.id) {
            return Err(RegistryError::DuplicateId(def.id));
        }

        for dep in &def.dependencies {
            if !guard.contains_key(dep) {
                return Err(RegistryError::UnknownDependency {
                    stage: def.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        guard.insert(def.id.clone(), def);
        drop(guard);

        if let Err(cycle) = self.detect_cycles() {
            // Roll back: a newly registered definition that completes a
            // cycle must not be left in the catalogue.
            self.definitions.write().remove(&cycle.offending);
            return Err(RegistryError::CycleDetected(cycle.describe()));
        }

        Ok(())
    }

    /// Registers a batch together, so definitions may depend on siblings in
    /// the same batch regardless of insertion order (`spec.md` §4.1:
    /// "topological feasibility ... or declared in the same batch").
    ///
    /// Dependency resolution is a fixed-point over the batch: a definition
    /// is inserted only once every one of its dependencies is either
    /// already registered or has *itself* already been inserted earlier in
    /// this same resolution (not merely submitted). This matters because a
    /// shape-valid definition whose own dependency is invalid, or never
    /// resolves, is never actually inserted — and a sibling that names it
    /// as a dependency must see it as unresolved too, rather than treating
    /// every submitted id as present regardless of whether it made it in.
    pub fn register_batch(&self, defs: Vec<StageDefinition>) -> Result<(), Vec<RegistryError>> {
        let mut errors = Vec::new();

        let mut pending: Vec<StageDefinition> = Vec::new();
        for def in defs {
            let shape_errors = self.validate_definition(&def);
            if shape_errors.is_empty() {
                pending.push(def);
            } else {
                errors.push(RegistryError::InvalidDefinition {
                    id: def.id.clone(),
                    errors: shape_errors,
                });
            }
        }

        // Ids actually inserted so far in this batch — the only thing, aside
        // from the pre-existing catalogue, that can satisfy a dependency.
        let mut inserted: std::collections::HashSet<StageId> = std::collections::HashSet::new();
        loop {
            let mut progressed = false;
            let mut still_pending = Vec::new();
            for def in pending {
                let unresolved = def.dependencies.iter().find(|dep| !inserted.contains(*dep) && self.get(dep).is_none()).cloned();
                match unresolved {
                    None => {
                        inserted.insert(def.id.clone());
                        self.definitions.write().insert(def.id.clone(), def);
                        progressed = true;
                    }
                    Some(_) => still_pending.push(def),
                }
            }
            pending = still_pending;
            if pending.is_empty() || !progressed {
                break;
            }
        }

        // Whatever never resolved depends, directly or transitively, on a
        // definition that was rejected or is genuinely unknown.
        for def in &pending {
            if let Some(dependency) = def.dependencies.iter().find(|dep| !inserted.contains(*dep) && self.get(dep).is_none()).cloned() {
                errors.push(RegistryError::UnknownDependency {
                    stage: def.id.clone(),
                    dependency,
                });
            }
        }

        if let Err(cycle) = self.detect_cycles() {
            errors.push(RegistryError::CycleDetected(cycle.describe()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Shape and cross-field validation (`spec.md` §3, §4.1). Does not check
    /// the global dependency graph — that is `register`'s job, since it
    /// needs the rest of the catalogue.
    pub fn validate_definition(&self, def: &StageDefinition) -> Vec<String> {
        let mut errors = Vec::new();

        if !def.allowed_statuses.contains(&StageStatus::Pending) {
            errors.push("allowed_statuses must include PENDING".to_string());
        }
        if !def.has_completion_status() {
            errors.push(
                "allowed_statuses must include at least one completion status (DONE, CREATED, PASSED, DEPLOYED)"
                    .to_string(),
            );
        }
        if def.dependencies.contains(&def.id) {
            errors.push(format!("stage '{}' cannot depend on itself", def.id));
        }
        if def.timeout.as_secs() < 1 {
            errors.push("timeout must be >= 1s".to_string());
        }
        if def.supports_multiple_events && def.timeout < MIN_MULTI_EVENT_TIMEOUT {
            errors.push("multi-event stages require a timeout >= 60s".to_string());
        }
        // "critical stages should be retryable" is a warning in the spec,
        // not a hard validation failure; surfaced via tracing instead.
        if def.critical && !def.retryable {
            tracing::warn!(
                stage = %def.id,
                "critical stage is not retryable; a single failed attempt will fail the build"
            );
        }

        errors
    }

    /// Validates a stage's payload object against its registered schema.
    /// Returns `Ok(())` or the list of violations. A lookup miss is not a
    /// validation error: the caller (orchestrator) treats "no such stage" as
    /// its own condition.
    pub fn validate_payload(&self, id: &StageId, payload: &serde_json::Value) -> Result<(), Vec<String>> {
        let guard = self.definitions.read();
        let Some(def) = guard.get(id) else {
            return Ok(());
        };
        let errors = def.payload_schema.validate(payload);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn get(&self, id: &StageId) -> Option<StageDefinition> {
        self.definitions.read().get(id).cloned()
    }

    pub fn all(&self) -> Vec<StageDefinition> {
        self.definitions.read().values().cloned().collect()
    }

    pub fn can_transition(&self, id: &StageId, from: StageStatus, to: StageStatus) -> bool {
        self.get(id).is_some_and(|def| def.can_transition(from, to))
    }

    pub fn dependencies(&self, id: &StageId) -> Vec<StageId> {
        self.get(id).map(|d| d.dependencies).unwrap_or_default()
    }

    pub fn is_retryable(&self, id: &StageId) -> bool {
        self.get(id).is_some_and(|d| d.retryable)
    }

    pub fn is_critical(&self, id: &StageId) -> bool {
        self.get(id).is_some_and(|d| d.critical)
    }

    /// Fresh per-build seed for a stage about to begin, at `PENDING` with a
    /// derived attempt budget (`attemptCount <= retries + 1`; the registry
    /// encodes the retry policy as simply retryable-or-not, so the budget is
    /// either 1 or the orchestrator's configured default max attempts).
    pub fn instance_for(&self, id: &StageId, default_max_attempts: u32) -> Option<StageInstanceSeed> {
        let def = self.get(id)?;
        Some(StageInstanceSeed {
            stage_id: def.id,
            status: StageStatus::Pending,
            max_attempts: if def.retryable { default_max_attempts.max(1) } else { 1 },
        })
    }

    /// Computes a deterministic topological execution order (Kahn's
    /// algorithm, lexicographic tie-break on stage id) over every registered
    /// definition. Returns [`RegistryError::CycleDetected`] if the graph is
    /// not a DAG — this registry does not leave cycle detection as a
    /// follow-up, unlike a naive first pass might.
    pub fn compile(&self) -> Result<Vec<StageId>, RegistryError> {
        let guard = self.definitions.read();
        let mut in_degree: FxHashMap<StageId, usize> =
            guard.keys().map(|id| (id.clone(), 0)).collect();
        let mut dependents: FxHashMap<StageId, Vec<StageId>> = FxHashMap::default();

        for def in guard.values() {
            for dep in &def.dependencies {
                *in_degree.entry(def.id.clone()).or_insert(0) += 1;
                dependents.entry(dep.clone()).or_default().push(def.id.clone());
            }
        }

        let mut ready: std::collections::BTreeSet<StageId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let mut order = Vec::with_capacity(guard.len());
        while let Some(next) = ready.iter().next().cloned() {
            ready.remove(&next);
            order.push(next.clone());
            if let Some(deps) = dependents.get(&next) {
                for dependent in deps {
                    let degree = in_degree.get_mut(dependent).expect("tracked in_degree");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.clone());
                    }
                }
            }
        }

        if order.len() != guard.len() {
            let offending = guard
                .keys()
                .find(|id| !order.contains(id))
                .cloned()
                .expect("cycle must involve an unvisited stage");
            return Err(RegistryError::CycleDetected(
                CycleReport {
                    offending,
                    remaining: guard.keys().filter(|id| !order.contains(id)).cloned().collect(),
                }
                .describe(),
            ));
        }

        Ok(order)
    }

    /// DFS-with-recursion-stack cycle check used internally right after a
    /// mutation, independent of `compile`'s Kahn's-algorithm pass, so a
    /// caller gets a precise "stage X is on a cycle" report immediately
    /// rather than waiting for the next `compile()` call.
    fn detect_cycles(&self) -> Result<(), CycleReport> {
        let guard = self.definitions.read();
        let mut state: FxHashMap<StageId, VisitState> = FxHashMap::default();

        for id in guard.keys() {
            if !matches!(state.get(id), Some(VisitState::Done)) {
                let mut stack = Vec::new();
                if let Some(cycle) = visit(id, &guard, &mut state, &mut stack) {
                    return Err(cycle);
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

struct CycleReport {
    offending: StageId,
    remaining: Vec<StageId>,
}

impl CycleReport {
    fn describe(&self) -> String {
        format!(
            "{} (stages not reachable in dependency order: {:?})",
            self.offending,
            self.remaining.iter().map(StageId::as_str).collect::<Vec<_>>()
        )
    }
}

fn visit(
    id: &StageId,
    defs: &FxHashMap<StageId, StageDefinition>,
    state: &mut FxHashMap<StageId, VisitState>,
    stack: &mut Vec<StageId>,
) -> Option<CycleReport> {
    state.insert(id.clone(), VisitState::InProgress);
    stack.push(id.clone());

    if let Some(def) = defs.get(id) {
        for dep in &def.dependencies {
            match state.get(dep) {
                Some(VisitState::InProgress) => {
                    return Some(CycleReport {
                        offending: dep.clone(),
                        remaining: stack.clone(),
                    });
                }
                Some(VisitState::Done) => continue,
                None => {
                    if let Some(cycle) = visit(dep, defs, state, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
    }

    stack.pop();
    state.insert(id.clone(), VisitState::Done);
    None
}
