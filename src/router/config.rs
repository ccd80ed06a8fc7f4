//! Environment-driven Model Router configuration (`spec.md` §6), following
//! the teacher's `runtimes::runtime_config::RuntimeConfig` pattern.

use std::time::Duration;

/// `DEMO_MODE` values (`spec.md` §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DemoMode {
    /// Enable the demo fallback only if no real provider keys are configured.
    #[default]
    Auto,
    Enabled,
    Disabled,
}

impl DemoMode {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "enabled" => DemoMode::Enabled,
            "disabled" => DemoMode::Disabled,
            _ => DemoMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub enabled_providers: Vec<String>,
    pub demo_mode: DemoMode,
    pub health_check_interval: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_ceiling: Duration,
    pub default_request_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled_providers: Vec::new(),
            demo_mode: DemoMode::Auto,
            health_check_interval: Duration::from_millis(60_000),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_ceiling: Duration::from_secs(30),
            default_request_timeout: Duration::from_secs(30),
        }
    }
}

impl RouterConfig {
    /// Loads from the environment (after `.env`, mirroring the teacher's
    /// `dotenvy::dotenv().ok()` pattern). Missing variables fall back to
    /// documented defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("ENABLED_PROVIDERS") {
            config.enabled_providers = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(raw) = std::env::var("DEMO_MODE") {
            config.demo_mode = DemoMode::parse(&raw);
        }

        if let Ok(raw) = std::env::var("HEALTH_CHECK_INTERVAL_MS") {
            if let Ok(ms) = raw.parse::<u64>() {
                config.health_check_interval = Duration::from_millis(ms);
            }
        }

        config
    }

    /// Reads `PROVIDER_<NAME>_API_KEY`; absence disables that provider
    /// (`spec.md` §6).
    pub fn api_key_for(name: &str) -> Option<String> {
        let var = format!("PROVIDER_{}_API_KEY", name.to_ascii_uppercase());
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }

    /// Demo provider is enabled when `DEMO_MODE=enabled`, or in `auto` mode
    /// when no enabled provider has a configured API key.
    pub fn demo_enabled(&self) -> bool {
        match self.demo_mode {
            DemoMode::Enabled => true,
            DemoMode::Disabled => false,
            DemoMode::Auto => !self
                .enabled_providers
                .iter()
                .any(|name| Self::api_key_for(name).is_some()),
        }
    }
}
