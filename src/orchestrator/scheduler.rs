//! Wave scheduler: groups the Stage Registry's compiled order into
//! dependency layers and bounds how many stages within one layer run
//! concurrently (`SPEC_FULL.md` §4.3: "a wave scheduler ... computes
//! topological layers from the Stage Registry ... and runs each layer
//! through a `Scheduler` with a configurable concurrency permit count").

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Semaphore;

use crate::registry::StageRegistry;
use crate::types::StageId;

/// Computes dependency layers over a topologically-compiled stage order.
/// A stage's layer is one past the deepest layer among its dependencies, so
/// stages sharing a layer have no direct dependency on one another and are
/// safe to run concurrently.
pub fn layers(order: &[StageId], registry: &StageRegistry) -> Vec<Vec<StageId>> {
    let mut layer_of: FxHashMap<StageId, usize> = FxHashMap::default();
    let mut max_layer = 0usize;

    for id in order {
        let deps = registry.dependencies(id);
        let layer = deps.iter().filter_map(|d| layer_of.get(d)).max().map_or(0, |l| l + 1);
        layer_of.insert(id.clone(), layer);
        max_layer = max_layer.max(layer);
    }

    let mut waves: Vec<Vec<StageId>> = vec![Vec::new(); max_layer + 1];
    for id in order {
        waves[layer_of[id]].push(id.clone());
    }
    waves
}

/// Bounds how many stages within one wave run concurrently. Default
/// concurrency is 1 ([`super::config::OrchestratorConfig::stage_parallelism`]):
/// strict sequential is the safe default.
pub struct Scheduler {
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_generation_stages_share_a_layer() {
        let registry = StageRegistry::with_builtins();
        let order = registry.compile().unwrap();
        let waves = layers(&order, &registry);

        let layer_of_id = |id: &str| {
            waves
                .iter()
                .position(|wave| wave.iter().any(|s| s.as_str() == id))
                .unwrap()
        };
        assert_eq!(layer_of_id("creating_docs"), layer_of_id("creating_schema"));
        assert!(layer_of_id("creating_specs") < layer_of_id("creating_docs"));
        assert!(layer_of_id("creating_workspace") < layer_of_id("creating_files"));
        assert!(layer_of_id("deploying") < layer_of_id("deployment_complete"));
    }

    #[test]
    fn every_stage_appears_in_exactly_one_wave() {
        let registry = StageRegistry::with_builtins();
        let order = registry.compile().unwrap();
        let waves = layers(&order, &registry);
        let total: usize = waves.iter().map(Vec::len).sum();
        assert_eq!(total, order.len());
    }
}
