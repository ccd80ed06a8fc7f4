//! # buildforge: AI-assisted application build pipeline core
//!
//! `buildforge` runs a pipeline of build stages — from repository setup
//! through code generation, testing, and deployment — dispatching each
//! stage's LLM-backed work across a pool of model providers and streaming
//! progress to subscribers in real time.
//!
//! ## Core Concepts
//!
//! - **Stage Registry** ([`registry`]): the closed vocabulary of build
//!   stages, their dependencies, and the compiled execution plan.
//! - **Model Router** ([`router`]): provider selection, retry/backoff, and
//!   streaming completions for stage work that calls out to an LLM.
//! - **Pipeline Orchestrator** ([`orchestrator`]): drives a build through
//!   its stages wave by wave, merging concurrent outcomes deterministically.
//! - **Event Stream Fabric** ([`event_fabric`]): per-build broadcast of
//!   progress events to any number of live subscribers, with replay for
//!   latecomers.
//! - **Storage** ([`storage`]): durable build/stage/event state behind a
//!   single trait, with in-memory, SQLite, and Postgres backends.
//! - **Metrics & Audit Collector** ([`metrics`]): rolling counters and
//!   queryable stats derived from the same event stream.
//!
//! ## Quick Start
//!
//! ### Messages
//!
//! ```
//! use buildforge::message::Message;
//!
//! let user_msg = Message::user("Build me a todo app with auth");
//! let assistant_msg = Message::assistant("Starting with repo scaffolding...");
//! assert!(user_msg.has_role(Message::USER));
//! assert!(!assistant_msg.has_role(Message::USER));
//! ```
//!
//! ### Subscribing to build events
//!
//! ```
//! use buildforge::event_fabric::{EventFabric, AllowAll, EventEnvelope};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let fabric = EventFabric::new();
//! fabric
//!     .publish("b-1", EventEnvelope::pipeline_update("b-1", "RUNNING", "starting"))
//!     .await
//!     .unwrap();
//!
//! let (backlog, mut stream) = fabric
//!     .subscribe("b-1", "token", &AllowAll, true)
//!     .await
//!     .unwrap();
//! assert_eq!(backlog.len(), 1);
//! # let _ = stream.recv();
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - Shared identifiers and status alphabets
//! - [`errors`] - Cause-chained, scoped error events
//! - [`telemetry`] - Human-readable rendering of events and error ladders
//! - [`message`] - Chat-style message types used by the Model Router
//! - [`event_fabric`] - Per-build event broadcast, replay, and liveness
//! - [`registry`] - Stage Registry: definitions, dependencies, compilation
//! - [`router`] - Model Router: providers, selection, retries, streaming
//! - [`stage`] - Stage execution contract and built-in stage handlers
//! - [`orchestrator`] - Pipeline Orchestrator: build/stage state machines
//! - [`storage`] - Durable persistence trait and backends
//! - [`metrics`] - Rolling counters and the stats query surface
//! - [`utils`] - Shared helpers (id generation, JSON utilities)

pub mod errors;
pub mod event_fabric;
pub mod message;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod stage;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod utils;
