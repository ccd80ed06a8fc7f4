//! Query-side types for the Metrics & Audit Collector's `get_stats`
//! (`spec.md` §4.5, §6 `metrics:{date}`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// An inclusive `[start, end]` window over calendar days.
///
/// Per `SPEC_FULL.md` §9 resolution 2, there is deliberately no
/// `previous()`/`getPreviousTimeRange`-equivalent helper here: the source's
/// helper returned the same range as the current one, making any
/// growth-rate computed from it meaningless (`spec.md` §9 Open Question).
/// Callers wanting a trend construct two explicit `TimeRange`s and diff the
/// two `StatsSnapshot`s themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        assert!(start <= end, "TimeRange start must not be after end");
        Self { start, end }
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn today() -> Self {
        let today = Utc::now().date_naive();
        Self::single_day(today)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    /// Every calendar day this range spans, inclusive.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut cur = self.start;
        while cur <= self.end {
            days.push(cur);
            cur += chrono::Duration::days(1);
        }
        days
    }
}

/// Filters narrowing a `get_stats` query (`spec.md` §4.5).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsFilters {
    pub build_id: Option<String>,
    pub provider: Option<String>,
}

impl StatsFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_provider(provider: impl Into<String>) -> Self {
        Self {
            build_id: None,
            provider: Some(provider.into()),
        }
    }

    pub fn for_build(build_id: impl Into<String>) -> Self {
        Self {
            build_id: Some(build_id.into()),
            provider: None,
        }
    }
}

/// Per-provider rollup within a [`StatsSnapshot`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderStatsSummary {
    pub provider: String,
    pub calls: u64,
    pub failures: u64,
    pub tokens: u64,
    pub cost: f64,
    pub rate_limit_hits: u64,
    pub circuit_trips: u64,
}

/// The aggregate answer to `get_stats(time_range, filters)`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub range: Option<TimeRange>,
    pub total_builds: u64,
    pub succeeded_builds: u64,
    pub failed_builds: u64,
    pub cancelled_builds: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub rate_limit_hits: u64,
    pub circuit_trips: u64,
    pub per_provider: Vec<ProviderStatsSummary>,
}

impl StatsSnapshot {
    pub fn failure_rate(&self) -> f64 {
        if self.total_builds == 0 {
            0.0
        } else {
            self.failed_builds as f64 / self.total_builds as f64
        }
    }
}

/// A threshold breach surfaced by [`super::collector::MetricsCollector::check_alerts`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Alert {
    FailureRateExceeded { observed: f64, threshold: f64 },
    DailyCostExceeded { observed: f64, threshold: f64 },
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::FailureRateExceeded { observed, threshold } => {
                write!(f, "failure rate {observed:.3} exceeds threshold {threshold:.3}")
            }
            Alert::DailyCostExceeded { observed, threshold } => {
                write!(f, "daily cost {observed:.2} exceeds threshold {threshold:.2}")
            }
        }
    }
}

/// Configurable alert thresholds (`spec.md` §4.5: "not hardcoded").
#[derive(Clone, Copy, Debug)]
pub struct AlertThresholds {
    pub failure_rate: f64,
    pub daily_cost: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            daily_cost: 100.0,
        }
    }
}

/// Used internally to timestamp per-build-completion rollups; exported so
/// callers doing custom aggregation can share the same clock boundary.
pub fn day_of(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}
