//! Rolling per-provider accounting: token/cost/latency averages maintained
//! via an exponentially-weighted moving average (`spec.md` §4.2: "α = 0.1").

use std::time::Duration;

use serde::{Deserialize, Serialize};

const EWMA_ALPHA: f64 = 0.1;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProviderStats {
    pub observed_latency_ms: f64,
    pub reliability: f64,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub rate_limit_hits: u64,
    pub circuit_trips: u64,
}

impl ProviderStats {
    pub fn new(base_latency: Duration, base_reliability: f64) -> Self {
        Self {
            observed_latency_ms: base_latency.as_millis() as f64,
            reliability: base_reliability,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_tokens: 0,
            total_cost: 0.0,
            rate_limit_hits: 0,
            circuit_trips: 0,
        }
    }

    pub fn record_success(&mut self, latency_ms: u64, tokens: u64, cost: f64) {
        self.total_calls += 1;
        self.total_successes += 1;
        self.total_tokens += tokens;
        self.total_cost += cost;
        self.observed_latency_ms = ewma(self.observed_latency_ms, latency_ms as f64);
        self.reliability = ewma(self.reliability, 1.0);
    }

    pub fn record_failure(&mut self) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.reliability = ewma(self.reliability, 0.0);
    }

    pub fn record_rate_limit_hit(&mut self) {
        self.rate_limit_hits += 1;
    }

    pub fn record_circuit_trip(&mut self) {
        self.circuit_trips += 1;
    }
}

fn ewma(previous: f64, sample: f64) -> f64 {
    EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * previous
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_trends_toward_recent_outcomes() {
        let mut stats = ProviderStats::new(Duration::from_millis(500), 0.5);
        for _ in 0..50 {
            stats.record_success(400, 100, 0.001);
        }
        assert!(stats.reliability > 0.95);
    }
}
