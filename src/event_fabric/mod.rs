//! Event Stream Fabric: per-build broadcast hub, replay backlog, and
//! transport-agnostic subscriber plumbing (`SPEC_FULL.md` §4.4).

mod emitter;
mod event;
mod fabric;
mod hub;
mod replay;
mod sink;

pub use emitter::{EmitterError, EventEmitter};
pub use event::{EventEnvelope, EventKind};
pub use fabric::{
    AllowAll, BuildAuthorizer, ConnectionLiveness, EventFabric, FabricError, CLOSE_NOT_FOUND,
    CLOSE_RATE_LIMITED, CLOSE_UNAUTHORIZED,
};
pub use hub::{BlockingEventIter, EventHub, EventHubMetrics, EventStream, HubEmitter};
pub use replay::{ReplayBuffer, ReplayLimits, DEFAULT_GRACE_WINDOW, DEFAULT_MAX_BYTES, DEFAULT_MAX_EVENTS};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink};
