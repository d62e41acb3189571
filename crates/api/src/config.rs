//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::{ExecutorConfig, RetryPolicy};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `"0.0.0.0"`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: Postgres instance store; unset keeps instances in memory
/// - `SWEEP_INTERVAL_SECS`: how often the worker resumes active instances (default `5`)
/// - `SEED_DEMO_DATA`: `true` loads demo credit records into the in-memory store
///
/// Steps that do not carry their own retry policy or timeout fall back to:
/// - `STEP_TIMEOUT_SECS` (default `60`)
/// - `RETRY_MAX_ATTEMPTS` (default `3`)
/// - `RETRY_BASE_DELAY_MS` (default `100`)
/// - `RETRY_BACKOFF_MULTIPLIER` (default `2.0`, at least `1.0`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub sweep_interval: Duration,
    pub seed_demo_data: bool,
    pub executor: ExecutorConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            sweep_interval: lookup("SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|&secs: &u64| secs > 0)
                .map_or(defaults.sweep_interval, Duration::from_secs),
            seed_demo_data: lookup("SEED_DEMO_DATA")
                .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes")),
            executor: executor_config(&lookup, defaults.executor),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            sweep_interval: Duration::from_secs(5),
            seed_demo_data: false,
            executor: ExecutorConfig::default(),
        }
    }
}

fn executor_config(
    lookup: &impl Fn(&str) -> Option<String>,
    defaults: ExecutorConfig,
) -> ExecutorConfig {
    let retry = defaults.default_retry;
    let max_attempts = lookup("RETRY_MAX_ATTEMPTS")
        .and_then(|s| s.parse().ok())
        .filter(|&n: &u32| n > 0)
        .unwrap_or(retry.max_attempts);
    let base_delay = lookup("RETRY_BASE_DELAY_MS")
        .and_then(|s| s.parse().ok())
        .map_or(retry.base_delay, Duration::from_millis);
    let multiplier = lookup("RETRY_BACKOFF_MULTIPLIER")
        .and_then(|s| s.parse().ok())
        .filter(|&m: &f64| m.is_finite() && m >= 1.0)
        .unwrap_or(retry.backoff_multiplier);

    ExecutorConfig {
        default_retry: RetryPolicy::exponential(max_attempts, base_delay)
            .with_max_delay(retry.max_delay)
            .with_multiplier(multiplier),
        default_step_timeout: lookup("STEP_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|&secs: &u64| secs > 0)
            .map_or(defaults.default_step_timeout, Duration::from_secs),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert!(!config.seed_demo_data);
        assert_eq!(config.executor.default_retry, RetryPolicy::default());
        assert_eq!(config.executor.default_step_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_executor_overrides() {
        let config = from_pairs(&[
            ("STEP_TIMEOUT_SECS", "15"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("RETRY_BASE_DELAY_MS", "250"),
            ("RETRY_BACKOFF_MULTIPLIER", "3"),
        ]);
        let retry = &config.executor.default_retry;
        assert_eq!(config.executor.default_step_timeout, Duration::from_secs(15));
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(250));
        assert_eq!(retry.delay_for(2), Duration::from_millis(750));

        let fallback = from_pairs(&[
            ("RETRY_MAX_ATTEMPTS", "0"),
            ("RETRY_BACKOFF_MULTIPLIER", "0.5"),
        ]);
        assert_eq!(fallback.executor.default_retry, RetryPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/sagas"),
            ("SWEEP_INTERVAL_SECS", "30"),
            ("SEED_DEMO_DATA", "true"),
        ]);
        assert_eq!(config.addr(), "0.0.0.0:8080");
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/sagas")
        );
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert!(config.seed_demo_data);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("DATABASE_URL", ""),
            ("SWEEP_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
    }
}
