//! Top-level Event Stream Fabric: one [`EventHub`] + [`ReplayBuffer`] per
//! build, keyed by build id, with authorization and liveness concerns
//! factored out of any particular transport (`SPEC_FULL.md` §4.4, §6).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::sleep;

use super::emitter::EmitterError;
use super::event::EventEnvelope;
use super::hub::{EventHub, EventStream};
use super::replay::{ReplayBuffer, ReplayLimits};

/// WebSocket close codes from `SPEC_FULL.md` §6's stream contract.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
pub const CLOSE_NOT_FOUND: u16 = 4002;
pub const CLOSE_RATE_LIMITED: u16 = 4003;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("subscriber is not authorized for this build")]
    Unauthorized,
    #[error("build {0} has no event stream")]
    NotFound(String),
    #[error("subscriber rate limit exceeded")]
    RateLimited,
    #[error(transparent)]
    Emit(#[from] EmitterError),
}

impl FabricError {
    pub fn close_code(&self) -> Option<u16> {
        match self {
            FabricError::Unauthorized => Some(CLOSE_UNAUTHORIZED),
            FabricError::NotFound(_) => Some(CLOSE_NOT_FOUND),
            FabricError::RateLimited => Some(CLOSE_RATE_LIMITED),
            FabricError::Emit(_) => None,
        }
    }
}

/// Callback verifying that a bearer token may subscribe to a build's stream.
/// The transport layer supplies its own check; the fabric just enforces it.
pub trait BuildAuthorizer: Send + Sync {
    fn authorize(&self, build_id: &str, bearer_token: &str) -> bool;
}

/// Authorizer that accepts any token — used in tests and single-tenant demos.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl BuildAuthorizer for AllowAll {
    fn authorize(&self, _build_id: &str, _bearer_token: &str) -> bool {
        true
    }
}

struct BuildChannel {
    hub: Arc<EventHub>,
    replay: ReplayBuffer,
}

/// Heartbeat/liveness tracker for one subscriber connection, transport
/// agnostic (`SPEC_FULL.md` §4.4: 30s heartbeat, connection closes after
/// three consecutive missed pongs).
#[derive(Debug)]
pub struct ConnectionLiveness {
    missed_pongs: AtomicU32,
    max_missed: u32,
}

impl ConnectionLiveness {
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_MISSED: u32 = 3;

    pub fn new() -> Self {
        Self {
            missed_pongs: AtomicU32::new(0),
            max_missed: Self::DEFAULT_MAX_MISSED,
        }
    }

    pub fn with_max_missed(max_missed: u32) -> Self {
        Self {
            missed_pongs: AtomicU32::new(0),
            max_missed,
        }
    }

    /// Call when a pong is received in response to a ping.
    pub fn record_pong(&self) {
        self.missed_pongs.store(0, Ordering::Relaxed);
    }

    /// Call each time a heartbeat interval elapses with no pong observed.
    /// Returns true if the connection should now be closed.
    pub fn record_missed_pong(&self) -> bool {
        let missed = self.missed_pongs.fetch_add(1, Ordering::Relaxed) + 1;
        missed >= self.max_missed
    }

    pub fn missed_count(&self) -> u32 {
        self.missed_pongs.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionLiveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Manages one broadcast hub and replay buffer per build, tearing each down
/// after its grace window following a terminal event.
pub struct EventFabric {
    channels: RwLock<FxHashMap<String, BuildChannel>>,
    hub_capacity: usize,
    replay_limits: ReplayLimits,
}

impl EventFabric {
    pub fn new() -> Arc<Self> {
        Self::with_config(1024, ReplayLimits::default())
    }

    pub fn with_config(hub_capacity: usize, replay_limits: ReplayLimits) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(FxHashMap::default()),
            hub_capacity,
            replay_limits,
        })
    }

    async fn channel_for(&self, build_id: &str) -> Arc<EventHub> {
        if let Some(ch) = self.channels.read().await.get(build_id) {
            return Arc::clone(&ch.hub);
        }
        let mut guard = self.channels.write().await;
        let entry = guard.entry(build_id.to_string()).or_insert_with(|| BuildChannel {
            hub: EventHub::new(self.hub_capacity),
            replay: ReplayBuffer::new(self.replay_limits),
        });
        Arc::clone(&entry.hub)
    }

    /// Publishes an event to a build's stream, recording it in the replay
    /// buffer first so a subscriber that arrives immediately after still
    /// sees it.
    pub async fn publish(&self, build_id: &str, event: EventEnvelope) -> Result<(), FabricError> {
        {
            let guard = self.channels.read().await;
            if let Some(ch) = guard.get(build_id) {
                ch.replay.record(event.clone());
            }
        }
        let hub = self.channel_for(build_id).await;
        let is_terminal = matches!(
            event.kind,
            super::event::EventKind::PipelineComplete | super::event::EventKind::PipelineError
        );
        hub.publish(event).map_err(FabricError::from)?;
        if is_terminal {
            if let Some(ch) = self.channels.read().await.get(build_id) {
                ch.replay.mark_terminal();
            }
        }
        Ok(())
    }

    /// Subscribes to a build's stream after authorization, returning the
    /// replay backlog and a live stream continuation.
    pub async fn subscribe(
        &self,
        build_id: &str,
        bearer_token: &str,
        authorizer: &dyn BuildAuthorizer,
        known_build: bool,
    ) -> Result<(Vec<EventEnvelope>, EventStream), FabricError> {
        if !known_build {
            return Err(FabricError::NotFound(build_id.to_string()));
        }
        if !authorizer.authorize(build_id, bearer_token) {
            return Err(FabricError::Unauthorized);
        }
        let backlog = self
            .channels
            .read()
            .await
            .get(build_id)
            .map(|ch| ch.replay.snapshot())
            .unwrap_or_default();
        let hub = self.channel_for(build_id).await;
        Ok((backlog, hub.subscribe()))
    }

    /// Sweeps terminal builds whose grace window has elapsed, freeing their
    /// hub and replay buffer. Intended to run on a periodic background task.
    pub async fn sweep_expired(&self) {
        let mut guard = self.channels.write().await;
        guard.retain(|_, ch| !ch.replay.expired());
    }

    /// Spawns a background task that sweeps expired build channels on a
    /// fixed interval until the fabric itself is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let fabric = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                fabric.sweep_expired().await;
            }
        })
    }

    pub async fn active_build_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for EventFabric {
    fn default() -> Self {
        Self {
            channels: RwLock::new(FxHashMap::default()),
            hub_capacity: 1024,
            replay_limits: ReplayLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_replays_backlog() {
        let fabric = EventFabric::new();
        fabric
            .publish("b-1", EventEnvelope::pipeline_update("b-1", "RUNNING", "starting"))
            .await
            .unwrap();

        let (backlog, _stream) = fabric
            .subscribe("b-1", "tok", &AllowAll, true)
            .await
            .unwrap();
        assert_eq!(backlog.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_unknown_build_is_not_found() {
        let fabric = EventFabric::new();
        let err = fabric
            .subscribe("ghost", "tok", &AllowAll, false)
            .await
            .unwrap_err();
        assert_eq!(err.close_code(), Some(CLOSE_NOT_FOUND));
    }

    struct DenyAll;
    impl BuildAuthorizer for DenyAll {
        fn authorize(&self, _: &str, _: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn subscribe_denied_is_unauthorized() {
        let fabric = EventFabric::new();
        fabric
            .publish("b-1", EventEnvelope::pipeline_update("b-1", "RUNNING", "starting"))
            .await
            .unwrap();
        let err = fabric
            .subscribe("b-1", "tok", &DenyAll, true)
            .await
            .unwrap_err();
        assert_eq!(err.close_code(), Some(CLOSE_UNAUTHORIZED));
    }

    #[test]
    fn liveness_closes_after_max_missed_pongs() {
        let liveness = ConnectionLiveness::with_max_missed(3);
        assert!(!liveness.record_missed_pong());
        assert!(!liveness.record_missed_pong());
        assert!(liveness.record_missed_pong());
    }

    #[test]
    fn liveness_resets_on_pong() {
        let liveness = ConnectionLiveness::with_max_missed(2);
        liveness.record_missed_pong();
        liveness.record_pong();
        assert_eq!(liveness.missed_count(), 0);
    }
}
