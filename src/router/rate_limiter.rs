//! Per-provider rate-limit reservoir (`spec.md` §4.2, §5, §8 invariant 7).
//!
//! A token-bucket-style reservoir: `{max_requests, window_ms}` with a
//! minimum inter-request delay of `window_ms / max_requests` enforced
//! through a per-provider serialized queue. Consecutive 429s tighten the
//! minimum delay (up to a cap); an explicit `retry-after` overrides it for
//! one cooldown period.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Clone, Copy, Debug)]
pub struct ReservoirConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl ReservoirConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
        }
    }

    fn min_interval(&self) -> Duration {
        self.window / self.max_requests
    }
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self::new(60, Duration::from_secs(60))
    }
}

struct Inner {
    last_dispatch: Option<Instant>,
    min_interval: Duration,
    depleted_until: Option<Instant>,
    consecutive_rate_limits: u32,
}

/// Serializes calls to one provider so no caller proceeds without a slot.
pub struct RateLimiter {
    config: ReservoirConfig,
    inner: Mutex<Inner>,
    max_interval_cap: Duration,
}

impl RateLimiter {
    pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

    pub fn new(config: ReservoirConfig) -> Self {
        let min_interval = config.min_interval();
        Self {
            config,
            inner: Mutex::new(Inner {
                last_dispatch: None,
                min_interval,
                depleted_until: None,
                consecutive_rate_limits: 0,
            }),
            max_interval_cap: Duration::from_secs(300),
        }
    }

    /// Blocks the caller until a slot is available, honoring any active
    /// `retry-after` cooldown and the tightened minimum interval.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut guard = self.inner.lock().await;
                if let Some(until) = guard.depleted_until {
                    let now = Instant::now();
                    if now < until {
                        Some(until - now)
                    } else {
                        guard.depleted_until = None;
                        None
                    }
                } else if let Some(last) = guard.last_dispatch {
                    let elapsed = last.elapsed();
                    if elapsed < guard.min_interval {
                        Some(guard.min_interval - elapsed)
                    } else {
                        None
                    }
                } else {
                    None
                }
            };
            match wait {
                Some(duration) => sleep(duration).await,
                None => break,
            }
        }
        let mut guard = self.inner.lock().await;
        guard.last_dispatch = Some(Instant::now());
    }

    /// Records a 429 from the provider: consumes `retry-after` if present,
    /// otherwise waits the default 60s, and tightens the scheduler's
    /// minimum interval for subsequent consecutive rate limits.
    pub async fn record_rate_limited(&self, retry_after: Option<Duration>) {
        let mut guard = self.inner.lock().await;
        guard.consecutive_rate_limits += 1;
        let wait = retry_after.unwrap_or(Self::DEFAULT_RATE_LIMIT_WAIT);
        guard.depleted_until = Some(Instant::now() + wait);
        let tightened = guard.min_interval * (guard.consecutive_rate_limits + 1);
        guard.min_interval = tightened.min(self.max_interval_cap);
    }

    pub async fn record_success(&self) {
        let mut guard = self.inner.lock().await;
        guard.consecutive_rate_limits = 0;
        guard.min_interval = self.config.min_interval();
    }

    pub fn max_requests(&self) -> u32 {
        self.config.max_requests
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn at_max_requests_minus_one_proceeds_immediately() {
        let limiter = RateLimiter::new(ReservoirConfig::new(5, Duration::from_millis(100)));
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(90));
    }

    #[tokio::test]
    async fn sixth_request_in_window_is_delayed() {
        let limiter = Arc::new(RateLimiter::new(ReservoirConfig::new(5, Duration::from_millis(100))));
        let start = Instant::now();
        for _ in 0..6 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn retry_after_is_honored() {
        let limiter = RateLimiter::new(ReservoirConfig::new(5, Duration::from_millis(10)));
        limiter.record_rate_limited(Some(Duration::from_millis(60))).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
