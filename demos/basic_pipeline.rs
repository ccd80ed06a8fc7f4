//! Demo: running a build end-to-end against the demo provider.
//!
//! This walks through the smallest possible wiring of the three core
//! subsystems — Stage Registry, Model Router, Pipeline Orchestrator — plus
//! the Event Stream Fabric, and drives one build through every built-in
//! stage (`SPEC_FULL.md` §4.1's canonical plan) using only the `demo`
//! provider, so it runs with zero configuration.
//!
//! ```bash
//! cargo run --example basic_pipeline
//! ```

use std::sync::Arc;

use buildforge::event_fabric::EventFabric;
use buildforge::orchestrator::{Orchestrator, OrchestratorConfig};
use buildforge::registry::StageRegistry;
use buildforge::router::{DemoProvider, ModelRouter, RouterConfig};
use buildforge::storage::{InMemoryStorage, Storage};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("basic_pipeline=info".parse().unwrap()))
        .init();

    let registry = Arc::new(StageRegistry::with_builtins());
    let router = ModelRouter::new(RouterConfig::default());
    router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let fabric = EventFabric::new();

    // A late subscriber joining right after submission still sees the
    // replay backlog (`SPEC_FULL.md` §4.4), so we subscribe before the
    // orchestrator publishes its first event.
    let mut live_events = {
        let (backlog, stream) = fabric
            .subscribe("demo-build-1", "any-token", &buildforge::event_fabric::AllowAll, true)
            .await
            .expect("subscribe before the build exists is allowed for a demo authorizer");
        println!("backlog at subscribe time: {} events", backlog.len());
        stream
    };

    let orchestrator = Orchestrator::new(registry, router, storage, fabric, OrchestratorConfig::default());

    let spec = serde_json::json!({
        "projectName": "Todo App",
        "features": {"auth": true, "realtime": false},
    });
    let build = orchestrator.submit("demo-build-1", "project-1", "user-1", spec).await.expect("submit build");
    println!("submitted build {}", build.id);

    tokio::spawn(async move {
        while let Ok(event) = live_events.recv().await {
            println!("[event] {:?} stage={:?} status={:?} — {}", event.kind, event.stage, event.status, event.message);
        }
    });

    orchestrator.join(&build.id).await;

    let final_build = orchestrator.storage().load_build(&build.id).await.unwrap().unwrap();
    println!(
        "build {} finished as {:?} at {}% progress across {} stages",
        final_build.id,
        final_build.status,
        final_build.progress,
        final_build.stages.len()
    );
    for artifact in &final_build.artifacts {
        println!("artifact: {} {} ({})", artifact.kind, artifact.name, artifact.url);
    }
}
