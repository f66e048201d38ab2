//! Configuration management for the hookrelay delivery service.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use hookrelay_delivery::{
    AdvisorConfig, CircuitBreakerConfig, ClassificationRule, ClientConfig, DeliveryConfig,
    RetryPolicy,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The service works out of the box with production-ready defaults. Create
/// `config.toml` to customise configuration, or use environment variables
/// for deployment-specific overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Delivery
    /// Number of concurrent delivery lanes.
    ///
    /// Environment variable: `WORKER_THREADS`
    #[serde(default = "default_worker_threads", alias = "WORKER_THREADS")]
    pub worker_threads: usize,
    /// Dispatcher poll interval when the queue is empty, in milliseconds.
    ///
    /// Environment variable: `POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms", alias = "POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,
    /// Maximum time to wait for in-flight deliveries on shutdown, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,

    // HTTP client
    /// TCP connect timeout for webhook delivery, in milliseconds.
    ///
    /// Environment variable: `HTTP_CONNECT_TIMEOUT_MS`
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Read timeout for webhook delivery, in milliseconds.
    ///
    /// Environment variable: `HTTP_READ_TIMEOUT_MS`
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    // Retry
    /// Base delay for exponential backoff, in milliseconds.
    ///
    /// Environment variable: `RETRY_BASE_DELAY_MS`
    #[serde(default = "default_retry_base_delay_ms", alias = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,
    /// Cap on the pre-jitter retry delay, in milliseconds.
    ///
    /// Environment variable: `RETRY_MAX_DELAY_MS`
    #[serde(default = "default_retry_max_delay_ms", alias = "RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,
    /// Maximum retries per event after the initial attempt.
    ///
    /// Environment variable: `RETRY_MAX_RETRIES`
    #[serde(default = "default_retry_max_retries", alias = "RETRY_MAX_RETRIES")]
    pub retry_max_retries: u32,

    // Circuit breaker
    /// Consecutive failures required to open a webhook's circuit.
    ///
    /// Environment variable: `CIRCUIT_FAILURE_THRESHOLD`
    #[serde(default = "default_failure_threshold", alias = "CIRCUIT_FAILURE_THRESHOLD")]
    pub circuit_failure_threshold: u32,
    /// Cooldown before an open circuit admits a recovery probe, in seconds.
    ///
    /// Environment variable: `CIRCUIT_COOLDOWN_SECONDS`
    #[serde(default = "default_cooldown_seconds", alias = "CIRCUIT_COOLDOWN_SECONDS")]
    pub circuit_cooldown_seconds: u64,
    /// Probes admitted in the half-open state.
    ///
    /// Environment variable: `CIRCUIT_HALF_OPEN_TEST_LIMIT`
    #[serde(default = "default_half_open_test_limit", alias = "CIRCUIT_HALF_OPEN_TEST_LIMIT")]
    pub circuit_half_open_test_limit: u32,

    // Pause
    /// How long a PAUSE_WEBHOOK decision suspends deliveries, in seconds.
    ///
    /// Environment variable: `PAUSE_WINDOW_SECONDS`
    #[serde(default = "default_pause_window_seconds", alias = "PAUSE_WINDOW_SECONDS")]
    pub pause_window_seconds: u64,

    // Advisor
    /// Base URL of the remote classification advisor.
    ///
    /// Environment variable: `ADVISOR_URL`
    #[serde(default = "default_advisor_url", alias = "ADVISOR_URL")]
    pub advisor_url: String,
    /// Whether the advisor is consulted at all.
    ///
    /// Environment variable: `ADVISOR_ENABLED`
    #[serde(default = "default_advisor_enabled", alias = "ADVISOR_ENABLED")]
    pub advisor_enabled: bool,
    /// Advisor request timeout, in milliseconds.
    ///
    /// Environment variable: `ADVISOR_TIMEOUT_MS`
    #[serde(default = "default_advisor_timeout_ms", alias = "ADVISOR_TIMEOUT_MS")]
    pub advisor_timeout_ms: u64,
    /// Whether the rule engine backs up an unusable advisor.
    ///
    /// Environment variable: `ADVISOR_FALLBACK_ENABLED`
    #[serde(default = "default_advisor_fallback", alias = "ADVISOR_FALLBACK_ENABLED")]
    pub advisor_fallback_enabled: bool,
    /// Minimum confidence required to adopt an advisor decision.
    ///
    /// Environment variable: `ADVISOR_CONFIDENCE_THRESHOLD`
    #[serde(default = "default_confidence_threshold", alias = "ADVISOR_CONFIDENCE_THRESHOLD")]
    pub advisor_confidence_threshold: f64,

    // Classification
    /// Rule list overriding the built-in classification table.
    ///
    /// Config file only; an empty list keeps the defaults.
    #[serde(default)]
    pub classification_rules: Vec<ClassificationRule>,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, config file, and environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let env = Env::prefixed("").map(|key| match key.as_str().to_ascii_uppercase().as_str() {
            "HTTP_CONNECT_TIMEOUT_MS" => "connect_timeout_ms".into(),
            "HTTP_READ_TIMEOUT_MS" => "read_timeout_ms".into(),
            _ => key.into(),
        });

        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(env);

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the delivery engine configuration.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            worker_threads: self.worker_threads,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            pause_window: Duration::from_secs(self.pause_window_seconds),
            client_config: self.to_client_config(),
            retry_policy: self.to_retry_policy(),
            circuit_config: self.to_circuit_config(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Converts to the delivery HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            user_agent: "Hookrelay-Delivery/1.0".to_string(),
        }
    }

    /// Converts to the retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_retries: self.retry_max_retries,
        }
    }

    /// Converts to the circuit breaker configuration.
    pub fn to_circuit_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            cooldown: Duration::from_secs(self.circuit_cooldown_seconds),
            half_open_test_limit: self.circuit_half_open_test_limit,
        }
    }

    /// Converts to the advisor configuration, or `None` when disabled.
    pub fn to_advisor_config(&self) -> Option<AdvisorConfig> {
        if !self.advisor_enabled {
            return None;
        }
        Some(AdvisorConfig {
            url: self.advisor_url.clone(),
            timeout: Duration::from_millis(self.advisor_timeout_ms),
            confidence_threshold: self.advisor_confidence_threshold,
        })
    }

    /// The effective classification rule list.
    pub fn classification_rules(&self) -> Vec<ClassificationRule> {
        if self.classification_rules.is_empty() {
            hookrelay_delivery::default_rules()
        } else {
            self.classification_rules.clone()
        }
    }

    /// Validates configuration values.
    fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            anyhow::bail!("worker_threads must be greater than 0");
        }

        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            anyhow::bail!("HTTP timeouts must be greater than 0");
        }

        if self.retry_base_delay_ms == 0 {
            anyhow::bail!("retry_base_delay_ms must be greater than 0");
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms cannot be below retry_base_delay_ms");
        }

        if self.circuit_failure_threshold == 0 {
            anyhow::bail!("circuit_failure_threshold must be greater than 0");
        }

        if self.circuit_half_open_test_limit == 0 {
            anyhow::bail!("circuit_half_open_test_limit must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.advisor_confidence_threshold) {
            anyhow::bail!("advisor_confidence_threshold must be between 0.0 and 1.0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_max_retries: default_retry_max_retries(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_cooldown_seconds: default_cooldown_seconds(),
            circuit_half_open_test_limit: default_half_open_test_limit(),
            pause_window_seconds: default_pause_window_seconds(),
            advisor_url: default_advisor_url(),
            advisor_enabled: default_advisor_enabled(),
            advisor_timeout_ms: default_advisor_timeout_ms(),
            advisor_fallback_enabled: default_advisor_fallback(),
            advisor_confidence_threshold: default_confidence_threshold(),
            classification_rules: Vec::new(),
            rust_log: default_log_level(),
        }
    }
}

fn default_worker_threads() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_shutdown_timeout() -> u64 {
    15
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_retry_max_retries() -> u32 {
    5
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_seconds() -> u64 {
    60
}

fn default_half_open_test_limit() -> u32 {
    3
}

fn default_pause_window_seconds() -> u64 {
    3600
}

fn default_advisor_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_advisor_enabled() -> bool {
    true
}

fn default_advisor_timeout_ms() -> u64 {
    5000
}

fn default_advisor_fallback() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    //! Configuration loading tests using `figment::Jail` for isolation.
    //!
    //! Each test runs in its own sandboxed environment with isolated
    //! environment variables and file system, so tests can run in parallel
    //! without contaminating each other.

    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_match_specification() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.worker_threads, 5);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.read_timeout_ms, 10_000);
        assert_eq!(config.retry_base_delay_ms, 1000);
        assert_eq!(config.retry_max_delay_ms, 60_000);
        assert_eq!(config.retry_max_retries, 5);
        assert_eq!(config.circuit_failure_threshold, 5);
        assert_eq!(config.circuit_cooldown_seconds, 60);
        assert_eq!(config.circuit_half_open_test_limit, 3);
        assert_eq!(config.pause_window_seconds, 3600);
        assert!(config.advisor_enabled);
        assert_eq!(config.advisor_timeout_ms, 5000);
        assert!(config.advisor_fallback_enabled);
        assert!((config.advisor_confidence_threshold - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn env_variables_override_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("WORKER_THREADS", "12");
            jail.set_env("POLL_INTERVAL_MS", "250");
            jail.set_env("HTTP_CONNECT_TIMEOUT_MS", "2000");
            jail.set_env("HTTP_READ_TIMEOUT_MS", "20000");
            jail.set_env("RETRY_BASE_DELAY_MS", "500");
            jail.set_env("RETRY_MAX_DELAY_MS", "30000");
            jail.set_env("RETRY_MAX_RETRIES", "8");
            jail.set_env("CIRCUIT_FAILURE_THRESHOLD", "10");
            jail.set_env("CIRCUIT_COOLDOWN_SECONDS", "120");
            jail.set_env("CIRCUIT_HALF_OPEN_TEST_LIMIT", "5");
            jail.set_env("PAUSE_WINDOW_SECONDS", "600");
            jail.set_env("ADVISOR_URL", "http://advisor.internal:9000");
            jail.set_env("ADVISOR_ENABLED", "false");
            jail.set_env("ADVISOR_CONFIDENCE_THRESHOLD", "0.8");

            let config = Config::load().expect("config should load with env overrides");

            assert_eq!(config.worker_threads, 12);
            assert_eq!(config.poll_interval_ms, 250);
            assert_eq!(config.connect_timeout_ms, 2000);
            assert_eq!(config.read_timeout_ms, 20_000);
            assert_eq!(config.retry_base_delay_ms, 500);
            assert_eq!(config.retry_max_delay_ms, 30_000);
            assert_eq!(config.retry_max_retries, 8);
            assert_eq!(config.circuit_failure_threshold, 10);
            assert_eq!(config.circuit_cooldown_seconds, 120);
            assert_eq!(config.circuit_half_open_test_limit, 5);
            assert_eq!(config.pause_window_seconds, 600);
            assert_eq!(config.advisor_url, "http://advisor.internal:9000");
            assert!(!config.advisor_enabled);
            assert!(config.to_advisor_config().is_none());

            Ok(())
        });
    }

    #[test]
    fn config_file_overrides_rules() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                worker_threads = 3

                [[classification_rules]]
                name = "always-escalate"
                decision = "ESCALATE"
                priority = 1000
                "#,
            )?;

            let config = Config::load().expect("config should load from file");
            assert_eq!(config.worker_threads, 3);

            let rules = config.classification_rules();
            assert_eq!(rules.len(), 1);
            assert_eq!(rules[0].name, "always-escalate");
            assert!(rules[0].enabled);

            Ok(())
        });
    }

    #[test]
    fn empty_rule_list_keeps_defaults() {
        let config = Config::default();
        let rules = config.classification_rules();
        assert!(rules.iter().any(|r| r.name == "rate-limit"));
        assert!(rules.iter().any(|r| r.name == "client-error"));
    }

    #[test]
    fn conversions_carry_values_through() {
        let config = Config { retry_max_retries: 7, circuit_cooldown_seconds: 90, ..Default::default() };

        let delivery = config.to_delivery_config();
        assert_eq!(delivery.worker_threads, 5);
        assert_eq!(delivery.retry_policy.max_retries, 7);
        assert_eq!(delivery.circuit_config.cooldown, Duration::from_secs(90));
        assert_eq!(delivery.client_config.connect_timeout, Duration::from_millis(5000));
        assert_eq!(delivery.pause_window, Duration::from_secs(3600));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let config = Config { worker_threads: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { retry_base_delay_ms: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config =
            Config { retry_max_delay_ms: 10, retry_base_delay_ms: 100, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { advisor_confidence_threshold: 1.5, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { circuit_half_open_test_limit: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
