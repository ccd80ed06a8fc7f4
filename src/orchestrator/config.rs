//! Environment-driven Orchestrator configuration (`spec.md` §6), mirroring
//! `router::RouterConfig`/the teacher's `RuntimeConfig` pattern.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_concurrent_builds: usize,
    pub build_timeout: Duration,
    pub default_max_attempts: u32,
    pub retry_backoff_base: Duration,
    /// Bounded parallelism pool size for independent same-category stages
    /// within one build's dependency layer; default 1 is "strict sequential
    /// is the safe default" (`spec.md` §4.3).
    pub stage_parallelism: usize,
    pub progress_emit_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: 4,
            build_timeout: Duration::from_secs(2 * 60 * 60),
            default_max_attempts: 3,
            retry_backoff_base: Duration::from_millis(500),
            stage_parallelism: 1,
            progress_emit_interval: Duration::from_secs(1),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("MAX_CONCURRENT_BUILDS") {
            if let Ok(v) = raw.parse::<usize>() {
                config.max_concurrent_builds = v.max(1);
            }
        }
        if let Ok(raw) = std::env::var("BUILD_TIMEOUT_MS") {
            if let Ok(ms) = raw.parse::<u64>() {
                config.build_timeout = Duration::from_millis(ms);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_builds, 4);
        assert_eq!(config.build_timeout, Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.stage_parallelism, 1);
    }
}
