//! Metrics & Audit Collector: rolling counters and the `get_stats` query
//! surface the external dashboard collaborator consumes (`SPEC_FULL.md`
//! §4.5).

mod collector;
mod stats;

pub use collector::MetricsCollector;
pub use stats::{Alert, AlertThresholds, ProviderStatsSummary, StatsFilters, StatsSnapshot, TimeRange};
