//! Per-build replay buffer for late subscribers.
//!
//! `tokio::sync::broadcast` only delivers events published after a receiver
//! subscribes, so a client that connects mid-build would otherwise miss
//! everything before it. Each build keeps a bounded ring of its own recent
//! events (count AND byte bounded) that a fresh subscriber is replayed
//! before switching over to the live broadcast feed (`SPEC_FULL.md` §4.4).
//!
//! Mirrors the bookkeeping idiom of [`super::sink::MemorySink`] but scoped
//! per build and trimmed from both ends as new events arrive.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::event::EventEnvelope;

/// Default cap on buffered events per build.
pub const DEFAULT_MAX_EVENTS: usize = 2_000;
/// Default cap on total buffered bytes per build (approximate, wire-size).
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024 * 1024;
/// How long a terminal build's replay buffer survives before eviction,
/// giving a client time to finish draining it (`SPEC_FULL.md` §4.4).
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
pub struct ReplayLimits {
    pub max_events: usize,
    pub max_bytes: usize,
    pub grace_window: Duration,
}

impl Default for ReplayLimits {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            max_bytes: DEFAULT_MAX_BYTES,
            grace_window: DEFAULT_GRACE_WINDOW,
        }
    }
}

#[derive(Debug)]
struct Entry {
    event: EventEnvelope,
    size: usize,
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<Entry>,
    total_bytes: usize,
    terminal_since: Option<Instant>,
}

/// Bounded, thread-safe replay buffer for a single build's event history.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    inner: Arc<Mutex<Inner>>,
    limits: ReplayLimits,
}

impl ReplayBuffer {
    pub fn new(limits: ReplayLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::new(),
                total_bytes: 0,
                terminal_since: None,
            })),
            limits,
        }
    }

    pub fn record(&self, event: EventEnvelope) {
        let size = event.approx_size();
        let mut guard = self.inner.lock();
        guard.entries.push_back(Entry { event, size });
        guard.total_bytes += size;

        while guard.entries.len() > self.limits.max_events
            || guard.total_bytes > self.limits.max_bytes
        {
            match guard.entries.pop_front() {
                Some(evicted) => guard.total_bytes = guard.total_bytes.saturating_sub(evicted.size),
                None => break,
            }
        }
    }

    /// Events currently retained, oldest first.
    pub fn snapshot(&self) -> Vec<EventEnvelope> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// Marks the owning build terminal; starts the grace-window clock.
    pub fn mark_terminal(&self) {
        let mut guard = self.inner.lock();
        if guard.terminal_since.is_none() {
            guard.terminal_since = Some(Instant::now());
        }
    }

    /// True once the build is terminal and its grace window has elapsed —
    /// the fabric uses this to decide when it is safe to evict the buffer.
    pub fn expired(&self) -> bool {
        match self.inner.lock().terminal_since {
            Some(since) => since.elapsed() >= self.limits.grace_window,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(i: usize) -> EventEnvelope {
        EventEnvelope::stage_update("b-1", format!("stage-{i}"), "RUNNING", "progress")
    }

    #[test]
    fn evicts_oldest_past_count_limit() {
        let buf = ReplayBuffer::new(ReplayLimits {
            max_events: 3,
            ..Default::default()
        });
        for i in 0..5 {
            buf.record(ev(i));
        }
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].stage.as_deref(), Some("stage-2"));
    }

    #[test]
    fn not_expired_until_terminal_and_grace_elapsed() {
        let buf = ReplayBuffer::new(ReplayLimits {
            grace_window: Duration::from_millis(10),
            ..Default::default()
        });
        buf.record(ev(0));
        assert!(!buf.expired());
        buf.mark_terminal();
        assert!(!buf.expired());
        std::thread::sleep(Duration::from_millis(20));
        assert!(buf.expired());
    }
}
