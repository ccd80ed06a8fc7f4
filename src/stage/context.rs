//! Per-attempt execution context handed to a [`super::handler::StageHandler`]
//! (`spec.md` §4.3 step 2: "the build's artifacts so far, the original spec
//! payload, and a correlation id").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::orchestrator::build::{Artifact, StageEvent};
use crate::router::ModelRouter;
use crate::types::{StageId, StageStatus};

pub struct StageContext<'a> {
    pub build_id: &'a str,
    pub stage_id: StageId,
    pub spec: &'a Value,
    pub artifacts_so_far: &'a [Artifact],
    pub correlation_id: String,
    pub router: Arc<ModelRouter>,
    cancel: Arc<AtomicBool>,
    events: Vec<StageEvent>,
}

impl<'a> StageContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        build_id: &'a str,
        stage_id: StageId,
        spec: &'a Value,
        artifacts_so_far: &'a [Artifact],
        correlation_id: String,
        router: Arc<ModelRouter>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            build_id,
            stage_id,
            spec,
            artifacts_so_far,
            correlation_id,
            router,
            cancel,
            events: Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn emit(&mut self, message: impl Into<String>, status: StageStatus) {
        self.events.push(StageEvent::new(self.stage_id.clone(), message, status));
    }

    pub fn emit_with_details(&mut self, message: impl Into<String>, status: StageStatus, details: Value) {
        self.events
            .push(StageEvent::new(self.stage_id.clone(), message, status).with_details(details));
    }

    pub fn into_events(self) -> Vec<StageEvent> {
        self.events
    }
}
