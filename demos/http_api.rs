//! Demo: a thin `axum` binding realizing the literal HTTP/SSE surface of
//! `SPEC_FULL.md` §6 on top of the transport-agnostic `Orchestrator`/
//! `EventFabric` core. Authentication, request validation against the
//! questionnaire schema, and the dashboard are out of scope (`spec.md` §1);
//! this binding accepts any bearer token and a bare JSON spec object.
//!
//! Grounded on the teacher's `demos/demo7_axum_sse.rs`: one HTTP request
//! spins up a build whose events stream back over SSE in real time, the
//! same "isolated run, `EventStream` piped into Axum's SSE response type"
//! shape, generalized from a single in-process workflow to a per-build
//! channel looked up by id.
//!
//! ```bash
//! cargo run --example http_api --features sqlite
//! curl -X POST localhost:3000/pipelines -d '{"projectName":"Demo"}' -H 'content-type: application/json'
//! curl -N localhost:3000/pipelines/<id>/stream
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use buildforge::event_fabric::AllowAll;
use buildforge::orchestrator::{Orchestrator, OrchestratorConfig};
use buildforge::registry::StageRegistry;
use buildforge::router::{DemoProvider, ModelRouter, RouterConfig};
use buildforge::storage::SqliteStorage;
use buildforge::event_fabric::EventFabric;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

type AppState = Arc<Orchestrator>;

async fn create_pipeline(State(orchestrator): State<AppState>, Json(spec): Json<Value>) -> impl IntoResponse {
    let build_id = Uuid::new_v4().to_string();
    match orchestrator.submit(build_id.clone(), "demo-project", "demo-user", spec).await {
        Ok(build) => (StatusCode::ACCEPTED, Json(json!({"id": build.id, "status": build.status}))),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": err.to_string()}))),
    }
}

async fn get_pipeline(State(orchestrator): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match orchestrator.storage().load_build(&id).await {
        Ok(Some(build)) => (StatusCode::OK, Json(json!(build))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": err.to_string()}))),
    }
}

async fn list_pipelines(State(orchestrator): State<AppState>) -> impl IntoResponse {
    match orchestrator.storage().list_builds("demo-user").await {
        Ok(builds) => (StatusCode::OK, Json(json!(builds))),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": err.to_string()}))),
    }
}

async fn cancel_pipeline(State(orchestrator): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    if orchestrator.cancel(&id) {
        (StatusCode::OK, Json(json!({"cancelling": id})))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"error": "no running build with that id"})))
    }
}

async fn retry_pipeline(State(orchestrator): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match orchestrator.retry_build(&id).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"retrying": id}))),
        Err(err) => (StatusCode::CONFLICT, Json(json!({"error": err.to_string()}))),
    }
}

async fn retry_stage(State(orchestrator): State<AppState>, Path((id, stage_id)): Path<(String, String)>) -> impl IntoResponse {
    match orchestrator.retry_stage(&id, &stage_id).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"retrying_stage": stage_id}))),
        Err(err) => (StatusCode::CONFLICT, Json(json!({"error": err.to_string()}))),
    }
}

async fn delete_pipeline(State(orchestrator): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match orchestrator.storage().delete_build(&id).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn stream_pipeline(State(orchestrator): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let known = orchestrator.storage().load_build(&id).await.ok().flatten().is_some();
    let fabric: &Arc<EventFabric> = orchestrator.fabric();
    let (backlog, stream) = match fabric.subscribe(&id, "demo-token", &AllowAll, known).await {
        Ok(pair) => pair,
        Err(err) => return (StatusCode::from_u16(err.close_code().unwrap_or(404)).unwrap_or(StatusCode::NOT_FOUND), Json(json!({"error": err.to_string()}))).into_response(),
    };

    let backlog_stream = futures_util::stream::iter(backlog.into_iter().map(|event| Ok::<_, Infallible>(SseEvent::default().json_data(event).unwrap())));
    let live_stream = stream.into_async_stream().map(|event| Ok::<_, Infallible>(SseEvent::default().json_data(event).unwrap()));
    Sse::new(backlog_stream.chain(live_stream)).into_response()
}

async fn build_orchestrator() -> AppState {
    let registry = Arc::new(StageRegistry::with_builtins());
    let router = ModelRouter::new(RouterConfig::from_env());
    if router.config().demo_enabled() {
        router.register(DemoProvider::spec(), Arc::new(DemoProvider::new())).await;
    }
    let storage = SqliteStorage::connect("sqlite::memory:").await.expect("in-memory sqlite connects");
    let fabric = EventFabric::new();
    Orchestrator::new(registry, router, Arc::new(storage), fabric, OrchestratorConfig::from_env())
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("http_api=info".parse().unwrap()))
        .init();

    let orchestrator = build_orchestrator().await;
    let app = Router::new()
        .route("/pipelines", post(create_pipeline).get(list_pipelines))
        .route("/pipelines/{id}", get(get_pipeline).delete(delete_pipeline))
        .route("/pipelines/{id}/cancel", post(cancel_pipeline))
        .route("/pipelines/{id}/retry", post(retry_pipeline))
        .route("/pipelines/{id}/stages/{stageId}/retry", post(retry_stage))
        .route("/pipelines/{id}/stream", get(stream_pipeline))
        .with_state(orchestrator);

    let listener = TcpListener::bind("127.0.0.1:3000").await.expect("bind 127.0.0.1:3000");
    tracing::info!("listening on http://127.0.0.1:3000");
    axum::serve(listener, app).await.expect("server error");
}
