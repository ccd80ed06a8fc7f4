//! The Metrics & Audit Collector (`spec.md` §4.5): a passive subscriber that
//! folds pipeline events and Model Router completion callbacks into rolling
//! per-day/per-build/per-provider counters, exposed through `get_stats`.
//!
//! Grounded on the teacher's `EventHub::subscribe` consumer shape: this is
//! the same "drain a stream of records, fold into counters" pattern the
//! teacher uses for its diagnostics stream, generalized from one in-process
//! workflow to many concurrent builds.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::event_fabric::{EventEnvelope, EventKind};
use crate::router::{RouterError, RouterResponse};
use crate::storage::persisted::PersistedDailyMetrics;
use crate::storage::{Storage, StorageError};
use crate::types::BuildStatus;

use super::stats::{day_of, Alert, AlertThresholds, ProviderStatsSummary, StatsFilters, StatsSnapshot, TimeRange};

#[derive(Default)]
struct ProviderCounters {
    calls: u64,
    failures: u64,
    tokens: u64,
    cost: f64,
    rate_limit_hits: u64,
    circuit_trips: u64,
}

impl From<(&str, &ProviderCounters)> for ProviderStatsSummary {
    fn from((name, c): (&str, &ProviderCounters)) -> Self {
        Self {
            provider: name.to_string(),
            calls: c.calls,
            failures: c.failures,
            tokens: c.tokens,
            cost: c.cost,
            rate_limit_hits: c.rate_limit_hits,
            circuit_trips: c.circuit_trips,
        }
    }
}

/// Rolling counters, in-memory, with optional durable persistence to the
/// storage collaborator's `metrics:{date}` row (`spec.md` §6).
pub struct MetricsCollector {
    storage: Option<Arc<dyn Storage>>,
    daily: RwLock<FxHashMap<NaiveDate, PersistedDailyMetrics>>,
    per_provider: RwLock<FxHashMap<String, ProviderCounters>>,
    thresholds: AlertThresholds,
}

impl MetricsCollector {
    pub fn new(thresholds: AlertThresholds) -> Arc<Self> {
        Arc::new(Self {
            storage: None,
            daily: RwLock::new(FxHashMap::default()),
            per_provider: RwLock::new(FxHashMap::default()),
            thresholds,
        })
    }

    pub fn with_storage(thresholds: AlertThresholds, storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self {
            storage: Some(storage),
            daily: RwLock::new(FxHashMap::default()),
            per_provider: RwLock::new(FxHashMap::default()),
            thresholds,
        })
    }

    fn day_entry(daily: &mut FxHashMap<NaiveDate, PersistedDailyMetrics>, day: NaiveDate) -> &mut PersistedDailyMetrics {
        daily.entry(day).or_insert_with(|| PersistedDailyMetrics {
            date: day.to_string(),
            ..Default::default()
        })
    }

    /// Folds one pipeline event into the day it was observed on. Builds
    /// only count a terminal build status once their `pipeline_complete`
    /// event arrives (the orchestrator emits this event exactly once per
    /// build, per `spec.md` §8 invariant on pipeline completion events).
    pub fn record_event(&self, event: &EventEnvelope) {
        if event.kind != EventKind::PipelineComplete {
            return;
        }
        let day = day_of(event.timestamp);
        let mut daily = self.daily.write();
        let entry = Self::day_entry(&mut daily, day);
        entry.total_builds += 1;
        match event.status.as_deref() {
            Some("COMPLETED") => entry.succeeded_builds += 1,
            Some("FAILED") | Some("CANCELLED") => entry.failed_builds += 1,
            _ => {}
        }
    }

    /// Builds counted directly from a terminal [`BuildStatus`], for callers
    /// that prefer to drive the collector from the Orchestrator rather than
    /// from event envelopes.
    pub fn record_build_terminal(&self, status: BuildStatus, completed_at: chrono::DateTime<Utc>) {
        let day = day_of(completed_at);
        let mut daily = self.daily.write();
        let entry = Self::day_entry(&mut daily, day);
        entry.total_builds += 1;
        match status {
            BuildStatus::Completed => entry.succeeded_builds += 1,
            BuildStatus::Failed | BuildStatus::Cancelled => entry.failed_builds += 1,
            BuildStatus::Pending | BuildStatus::Running => {}
        }
    }

    /// A completed Model Router call (`spec.md` §4.2 "Accounting").
    pub fn record_router_success(&self, response: &RouterResponse) {
        let day = day_of(Utc::now());
        let tokens = response.tokens.total();
        {
            let mut daily = self.daily.write();
            let entry = Self::day_entry(&mut daily, day);
            entry.total_tokens += tokens;
            entry.total_cost += response.cost;
        }
        let mut providers = self.per_provider.write();
        let counters = providers.entry(response.provider.clone()).or_default();
        counters.calls += 1;
        counters.tokens += tokens;
        counters.cost += response.cost;
    }

    /// A failed Model Router attempt, classified into rate-limit/circuit
    /// counters where the error carries that information.
    pub fn record_router_failure(&self, error: &RouterError) {
        let day = day_of(Utc::now());
        let is_rate_limited = matches!(error, RouterError::RateLimited { .. });
        if is_rate_limited {
            let mut daily = self.daily.write();
            Self::day_entry(&mut daily, day).rate_limit_hits += 1;
        }
        if let Some(provider) = error.provider_name() {
            let mut providers = self.per_provider.write();
            let counters = providers.entry(provider.to_string()).or_default();
            counters.failures += 1;
            if is_rate_limited {
                counters.rate_limit_hits += 1;
            }
        }
    }

    /// Records a circuit breaker trip for `provider` (called by the Model
    /// Router when a breaker transitions Closed/Half-Open -> Open).
    pub fn record_circuit_trip(&self, provider: &str) {
        let day = day_of(Utc::now());
        {
            let mut daily = self.daily.write();
            Self::day_entry(&mut daily, day).circuit_trips += 1;
        }
        let mut providers = self.per_provider.write();
        providers.entry(provider.to_string()).or_default().circuit_trips += 1;
    }

    /// Answers `get_stats(time_range, filters)` (`spec.md` §4.5). The
    /// per-provider filter narrows `per_provider`; `build_id` is accepted
    /// for interface symmetry with `spec.md` §4.5 but this in-memory
    /// implementation does not index by build, so it is a no-op filter here
    /// (external dashboards join against `build:{id}` rows for that).
    pub fn get_stats(&self, range: TimeRange, filters: &StatsFilters) -> StatsSnapshot {
        let daily = self.daily.read();
        let mut snapshot = StatsSnapshot {
            range: Some(range),
            ..Default::default()
        };
        for day in range.days() {
            if let Some(metrics) = daily.get(&day) {
                snapshot.total_builds += metrics.total_builds;
                snapshot.succeeded_builds += metrics.succeeded_builds;
                snapshot.failed_builds += metrics.failed_builds;
                snapshot.total_tokens += metrics.total_tokens;
                snapshot.total_cost += metrics.total_cost;
                snapshot.rate_limit_hits += metrics.rate_limit_hits;
                snapshot.circuit_trips += metrics.circuit_trips;
            }
        }
        let providers = self.per_provider.read();
        snapshot.per_provider = providers
            .iter()
            .filter(|(name, _)| filters.provider.as_deref().is_none_or(|f| f == name.as_str()))
            .map(|(name, counters)| ProviderStatsSummary::from((name.as_str(), counters)))
            .collect();
        snapshot.per_provider.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshot
    }

    /// `spec.md` §4.5: "Computes simple alerts: failure rate over a
    /// configurable window exceeds threshold; daily cost exceeds threshold."
    pub fn check_alerts(&self, day: NaiveDate) -> Vec<Alert> {
        let snapshot = self.get_stats(TimeRange::single_day(day), &StatsFilters::none());
        let mut alerts = Vec::new();
        if snapshot.total_builds > 0 && snapshot.failure_rate() > self.thresholds.failure_rate {
            alerts.push(Alert::FailureRateExceeded {
                observed: snapshot.failure_rate(),
                threshold: self.thresholds.failure_rate,
            });
        }
        if snapshot.total_cost > self.thresholds.daily_cost {
            alerts.push(Alert::DailyCostExceeded {
                observed: snapshot.total_cost,
                threshold: self.thresholds.daily_cost,
            });
        }
        alerts
    }

    /// Flushes one day's in-memory counters to the storage collaborator, if
    /// configured. Intended to run on a periodic background task (mirroring
    /// [`crate::event_fabric::EventFabric::spawn_sweeper`]'s shape).
    #[instrument(skip(self))]
    pub async fn persist_day(&self, day: NaiveDate) -> Result<(), StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let metrics = {
            let daily = self.daily.read();
            daily.get(&day).cloned()
        };
        if let Some(metrics) = metrics {
            storage.save_daily_metrics(&metrics).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{AgentRole, TokenUsage};

    fn response(provider: &str, tokens: u64, cost: f64) -> RouterResponse {
        RouterResponse {
            content: "ok".to_string(),
            tokens: TokenUsage { input: tokens / 2, output: tokens - tokens / 2 },
            cost,
            latency_ms: 10,
            provider: provider.to_string(),
            model: "demo-model".to_string(),
        }
    }

    #[test]
    fn router_success_accumulates_provider_and_daily_totals() {
        let collector = MetricsCollector::new(AlertThresholds::default());
        collector.record_router_success(&response("demo", 100, 0.01));
        collector.record_router_success(&response("demo", 50, 0.005));

        let stats = collector.get_stats(TimeRange::today(), &StatsFilters::none());
        assert_eq!(stats.total_tokens, 150);
        assert!((stats.total_cost - 0.015).abs() < 1e-9);
        assert_eq!(stats.per_provider.len(), 1);
        assert_eq!(stats.per_provider[0].calls, 2);
    }

    #[test]
    fn failure_rate_alert_fires_above_threshold() {
        let collector = MetricsCollector::new(AlertThresholds { failure_rate: 0.4, daily_cost: 1_000.0 });
        let now = Utc::now();
        collector.record_build_terminal(BuildStatus::Completed, now);
        collector.record_build_terminal(BuildStatus::Failed, now);
        collector.record_build_terminal(BuildStatus::Failed, now);

        let alerts = collector.check_alerts(day_of(now));
        assert!(alerts.iter().any(|a| matches!(a, Alert::FailureRateExceeded { .. })));
    }

    #[test]
    fn daily_cost_alert_fires_above_threshold() {
        let collector = MetricsCollector::new(AlertThresholds { failure_rate: 1.0, daily_cost: 0.02 });
        collector.record_router_success(&response("demo", 100, 0.05));

        let alerts = collector.check_alerts(day_of(Utc::now()));
        assert!(alerts.iter().any(|a| matches!(a, Alert::DailyCostExceeded { .. })));
    }

    #[test]
    fn rate_limited_failure_is_tallied_per_provider() {
        let collector = MetricsCollector::new(AlertThresholds::default());
        collector.record_router_failure(&RouterError::RateLimited {
            provider: "demo".to_string(),
            retry_after_secs: 30,
        });

        let stats = collector.get_stats(TimeRange::today(), &StatsFilters::for_provider("demo"));
        assert_eq!(stats.rate_limit_hits, 1);
        assert_eq!(stats.per_provider[0].rate_limit_hits, 1);
    }

    #[tokio::test]
    async fn persist_day_is_a_noop_without_configured_storage() {
        let collector = MetricsCollector::new(AlertThresholds::default());
        collector.record_build_terminal(BuildStatus::Completed, Utc::now());
        collector.persist_day(day_of(Utc::now())).await.unwrap();
    }

    #[tokio::test]
    async fn persist_day_writes_through_configured_storage() {
        use crate::storage::InMemoryStorage;
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let collector = MetricsCollector::with_storage(AlertThresholds::default(), Arc::clone(&storage));
        let now = Utc::now();
        collector.record_build_terminal(BuildStatus::Completed, now);
        collector.persist_day(day_of(now)).await.unwrap();

        let loaded = storage.load_daily_metrics(&day_of(now).to_string()).await.unwrap().unwrap();
        assert_eq!(loaded.total_builds, 1);
    }
}
