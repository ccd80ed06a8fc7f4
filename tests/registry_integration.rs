//! Stage Registry boundary and cross-module integration tests: every
//! built-in definition survives a builder round-trip, custom tenant stages
//! slot into the dependency graph correctly, and the registry's compiled
//! order agrees with the orchestrator's wave scheduler.

mod common;

use buildforge::orchestrator::scheduler;
use buildforge::registry::{canonical_definitions, RegistryError, StageDefinition, StageRegistry};
use buildforge::types::StageStatus;

/// `validateDefinition(normalize(def))` round-trip: every canonical
/// definition, rebuilt from its own fields through the builder, still
/// passes validation unchanged.
#[test]
fn every_builtin_definition_round_trips_through_the_builder() {
    let registry = StageRegistry::new();
    for def in canonical_definitions() {
        let dep_names: Vec<&str> = def.dependencies.iter().map(|d| d.as_str()).collect();
        let rebuilt = StageDefinition::builder(def.id.as_str(), def.label.clone())
            .description(def.description.clone())
            .category(def.category.clone())
            .multi_event(def.supports_multiple_events)
            .dependencies(&dep_names)
            .allowed_statuses(def.allowed_statuses.iter().copied().filter(|s| *s != StageStatus::Pending && *s != StageStatus::Running))
            .timeout(def.timeout)
            .retryable(def.retryable)
            .critical(def.critical)
            .build()
            .unwrap();
        let errors = registry.validate_definition(&rebuilt);
        assert!(errors.is_empty(), "{} failed validation after round-trip: {errors:?}", def.id);
    }
}

/// Boundary: empty dependency list is legal at the registry level.
#[test]
fn empty_dependencies_are_legal() {
    let registry = StageRegistry::new();
    let def = StageDefinition::builder("standalone", "Standalone")
        .allowed_statuses([StageStatus::Done])
        .build()
        .unwrap();
    assert!(registry.register(def).is_ok());
    assert!(registry.dependencies(&buildforge::types::StageId::new("standalone").unwrap()).is_empty());
}

/// Boundary: a stage cannot depend on itself, caught at validation time
/// before the dependency graph is ever touched.
#[test]
fn self_dependency_is_rejected_before_graph_mutation() {
    let registry = StageRegistry::with_builtins();
    let before = registry.all().len();
    let def = StageDefinition::builder("loopy", "Loopy")
        .dependencies(&["loopy"])
        .allowed_statuses([StageStatus::Done])
        .build()
        .unwrap();
    let err = registry.register(def).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidDefinition { .. }));
    assert_eq!(registry.all().len(), before, "a rejected definition must not be inserted");
}

/// A custom tenant stage can extend the built-in graph by depending on a
/// global stage; it is global-invisible (tenant-scoped) but structurally
/// indistinguishable to the scheduler.
#[test]
fn custom_tenant_stage_attaches_to_the_builtin_graph() {
    let registry = StageRegistry::with_builtins();
    let def = StageDefinition::builder("custom_lint", "Custom Lint")
        .dependencies(&["coding_file"])
        .allowed_statuses([StageStatus::Done])
        .category("custom")
        .tenant("acme-corp")
        .build()
        .unwrap();
    registry.register(def).unwrap();

    let id = buildforge::types::StageId::new("custom_lint").unwrap();
    assert!(!registry.get(&id).unwrap().is_global());
    assert_eq!(registry.dependencies(&id), vec![buildforge::types::StageId::new("coding_file").unwrap()]);

    let order = registry.compile().unwrap();
    assert_eq!(order.len(), 13);
    let pos = |s: &str| order.iter().position(|x| x.as_str() == s).unwrap();
    assert!(pos("coding_file") < pos("custom_lint"));
}

/// The registry's compiled topological order and the orchestrator's wave
/// layering never disagree: every stage's wave index is no smaller than
/// its position would require, and dependencies always land in a strictly
/// earlier wave than their dependents.
#[test]
fn compiled_order_and_wave_layers_agree_on_dependency_direction() {
    let registry = StageRegistry::with_builtins();
    let order = registry.compile().unwrap();
    let waves = scheduler::layers(&order, &registry);

    let wave_of = |id: &buildforge::types::StageId| waves.iter().position(|w| w.contains(id)).unwrap();

    for stage in &order {
        for dep in registry.dependencies(stage) {
            assert!(wave_of(&dep) < wave_of(stage), "{dep} must be in an earlier wave than {stage}");
        }
    }
    let total: usize = waves.iter().map(Vec::len).sum();
    assert_eq!(total, order.len());
}

/// A cycle introduced across a batch registration is rejected wholesale and
/// leaves the prior catalogue untouched.
#[test]
fn batch_registration_with_a_cycle_is_fully_rejected() {
    let registry = StageRegistry::with_builtins();
    let before = registry.all().len();
    let a = StageDefinition::builder("cycle_a", "Cycle A")
        .dependencies(&["cycle_b"])
        .allowed_statuses([StageStatus::Done])
        .build()
        .unwrap();
    let b = StageDefinition::builder("cycle_b", "Cycle B")
        .dependencies(&["cycle_a"])
        .allowed_statuses([StageStatus::Done])
        .build()
        .unwrap();
    let errors = registry.register_batch(vec![a, b]).unwrap_err();
    assert!(!errors.is_empty());
    // Each half of a purely cyclic pair names the other as a dependency, and
    // neither ever resolves in the fixed-point walk (it needs the other
    // inserted first) — so both are reported as having an unresolved
    // dependency, and the registry is left exactly as it was.
    assert!(errors.iter().all(|e| matches!(e, RegistryError::UnknownDependency { .. })));
    assert_eq!(registry.all().len(), before, "neither half of an unresolvable cycle is ever inserted");
}

/// Regression: a sibling that names a shape-invalid definition from the same
/// batch as its dependency must not be treated as having a satisfied
/// dependency just because that definition was *submitted* — only
/// definitions that actually make it into the registry can satisfy one.
#[test]
fn batch_sibling_depending_on_a_rejected_definition_is_also_rejected() {
    let registry = StageRegistry::with_builtins();
    let before = registry.all().len();

    // No completion status declared: shape-invalid on its own.
    let invalid = StageDefinition::builder("invalid_stage", "Invalid").build().unwrap();
    let dependent = StageDefinition::builder("dependent_stage", "Dependent")
        .dependencies(&["invalid_stage"])
        .allowed_statuses([StageStatus::Done])
        .build()
        .unwrap();

    let errors = registry.register_batch(vec![invalid, dependent]).unwrap_err();
    assert!(errors.iter().any(|e| matches!(e, RegistryError::InvalidDefinition { id, .. } if id.as_str() == "invalid_stage")));
    assert!(errors.iter().any(|e| matches!(e, RegistryError::UnknownDependency { stage, dependency }
        if stage.as_str() == "dependent_stage" && dependency.as_str() == "invalid_stage")));

    assert!(registry.get(&buildforge::types::StageId::new("invalid_stage").unwrap()).is_none());
    assert!(
        registry.get(&buildforge::types::StageId::new("dependent_stage").unwrap()).is_none(),
        "a stage whose declared dependency was never actually registered must not be inserted either"
    );
    assert_eq!(registry.all().len(), before);
}
