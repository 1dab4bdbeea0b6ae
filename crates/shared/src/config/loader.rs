//! Configuration loader
//!
//! Loads the controller configuration from an optional .env file and
//! `ARTZAIN_*` environment variables. Every option has a default, so an
//! empty environment is valid.

use std::path::Path;
use std::str::FromStr;

use super::dto::{
    CanaryDefaults, ControllerConfigDto, ExecutorConfig, HealthWeightsConfig, LoggingConfig,
    NatsConfig, PriceTableConfig, RollbackDefaults,
};
use super::error::{ConfigError, Result};
use super::validator::validate_controller_config;

/// Configuration loader
///
/// Loads configuration from:
/// 1. .env file (optional)
/// 2. Environment variables
///
/// Values from the .env file are exported into the process environment
/// before the variables are read, allowing local development overrides
/// without modifying the system environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Optional path to .env file
    env_file_path: Option<std::path::PathBuf>,
}

impl ConfigLoader {
    /// Create a new ConfigLoader.
    ///
    /// # Example
    ///
    /// ```
    /// use artzain_shared::config::ConfigLoader;
    ///
    /// // Without .env file
    /// let loader = ConfigLoader::new(None);
    /// ```
    pub fn new(env_file_path: Option<std::path::PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate the controller configuration.
    pub fn load_controller_config(&self) -> Result<ControllerConfigDto> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        let config = ControllerConfigDto::from_env()?;

        validate_controller_config(&config)?;

        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

// ============================================================================
// from_env implementations
// ============================================================================

impl ControllerConfigDto {
    /// Build the controller configuration from environment variables.
    ///
    /// All variables are optional; each falls back to its documented
    /// default.
    ///
    /// # Recognized variables
    ///
    /// - `ARTZAIN_MAX_CONCURRENT_PLANS` (default 16)
    /// - `ARTZAIN_DECISION_TIMEOUT_SECS` (default 300)
    /// - `ARTZAIN_POLICY_DEFAULT_MODE` (default "enforce")
    /// - `ARTZAIN_CANARY_INITIAL_PERCENT`, `ARTZAIN_CANARY_INCREMENT_PERCENT`,
    ///   `ARTZAIN_CANARY_STEP_SECS`, `ARTZAIN_CANARY_MIN_HEALTH`,
    ///   `ARTZAIN_CANARY_ANALYSIS_SAMPLES`, `ARTZAIN_CANARY_MAX_DURATION_SECS`,
    ///   `ARTZAIN_CANARY_AUTO_PROMOTE`, `ARTZAIN_CANARY_ABORT_ON_FAILURE`
    /// - `ARTZAIN_ROLLBACK_MIN_HEALTH`, `ARTZAIN_ROLLBACK_CHECK_INTERVAL_SECS`,
    ///   `ARTZAIN_ROLLBACK_CONSECUTIVE_BAD`, `ARTZAIN_ROLLBACK_COOLDOWN_SECS`
    /// - `ARTZAIN_HEALTH_WEIGHTS` (JSON, e.g. `{"readiness":0.6,"restarts":0.25,"bad_states":0.15}`)
    /// - `ARTZAIN_PRICE_TABLE` (JSON, e.g. `{"cpu_core_hour":0.05,"gpu_hour":{"L4":0.6}}`)
    /// - `ARTZAIN_NATS_URL`, `ARTZAIN_NATS_ENABLED`, `ARTZAIN_NATS_CONNECT_TIMEOUT_SECS`
    /// - `ARTZAIN_LOG_LEVEL`, `ARTZAIN_LOG_JSON`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            executor: ExecutorConfig::from_env()?,
            canary: CanaryDefaults::from_env()?,
            rollback: RollbackDefaults::from_env()?,
            health: HealthWeightsConfig::from_env()?,
            price_table: PriceTableConfig::from_env()?,
            nats: NatsConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_concurrent_plans: parse_optional_var(
                "ARTZAIN_MAX_CONCURRENT_PLANS",
                defaults.max_concurrent_plans,
            )?,
            per_decision_timeout_seconds: parse_optional_var(
                "ARTZAIN_DECISION_TIMEOUT_SECS",
                defaults.per_decision_timeout_seconds,
            )?,
            policy_default_mode: string_var(
                "ARTZAIN_POLICY_DEFAULT_MODE",
                &defaults.policy_default_mode,
            ),
        })
    }
}

impl CanaryDefaults {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            initial_percent: parse_optional_var(
                "ARTZAIN_CANARY_INITIAL_PERCENT",
                defaults.initial_percent,
            )?,
            increment_percent: parse_optional_var(
                "ARTZAIN_CANARY_INCREMENT_PERCENT",
                defaults.increment_percent,
            )?,
            step_duration_seconds: parse_optional_var(
                "ARTZAIN_CANARY_STEP_SECS",
                defaults.step_duration_seconds,
            )?,
            min_health_score: parse_optional_var(
                "ARTZAIN_CANARY_MIN_HEALTH",
                defaults.min_health_score,
            )?,
            analysis_samples: parse_optional_var(
                "ARTZAIN_CANARY_ANALYSIS_SAMPLES",
                defaults.analysis_samples,
            )?,
            max_duration_seconds: parse_optional_var(
                "ARTZAIN_CANARY_MAX_DURATION_SECS",
                defaults.max_duration_seconds,
            )?,
            auto_promote: parse_optional_var(
                "ARTZAIN_CANARY_AUTO_PROMOTE",
                defaults.auto_promote,
            )?,
            abort_on_failure: parse_optional_var(
                "ARTZAIN_CANARY_ABORT_ON_FAILURE",
                defaults.abort_on_failure,
            )?,
        })
    }
}

impl RollbackDefaults {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            min_health_score: parse_optional_var(
                "ARTZAIN_ROLLBACK_MIN_HEALTH",
                defaults.min_health_score,
            )?,
            check_interval_seconds: parse_optional_var(
                "ARTZAIN_ROLLBACK_CHECK_INTERVAL_SECS",
                defaults.check_interval_seconds,
            )?,
            consecutive_bad_threshold: parse_optional_var(
                "ARTZAIN_ROLLBACK_CONSECUTIVE_BAD",
                defaults.consecutive_bad_threshold,
            )?,
            cooldown_seconds: parse_optional_var(
                "ARTZAIN_ROLLBACK_COOLDOWN_SECS",
                defaults.cooldown_seconds,
            )?,
        })
    }
}

impl HealthWeightsConfig {
    pub fn from_env() -> Result<Self> {
        parse_json_var("ARTZAIN_HEALTH_WEIGHTS")
    }
}

impl PriceTableConfig {
    pub fn from_env() -> Result<Self> {
        parse_json_var("ARTZAIN_PRICE_TABLE")
    }
}

impl NatsConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            url: string_var("ARTZAIN_NATS_URL", &defaults.url),
            connection_timeout_secs: parse_optional_var(
                "ARTZAIN_NATS_CONNECT_TIMEOUT_SECS",
                defaults.connection_timeout_secs,
            )?,
            enabled: parse_optional_var("ARTZAIN_NATS_ENABLED", defaults.enabled)?,
            name: defaults.name,
        })
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            level: string_var("ARTZAIN_LOG_LEVEL", &defaults.level),
            json: parse_optional_var("ARTZAIN_LOG_JSON", defaults.json)?,
        })
    }
}

// ============================================================================
// Environment helpers
// ============================================================================

fn string_var(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_optional_var<T: FromStr>(var: &str, default: T) -> Result<T> {
    match std::env::var(var) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_json_var<T: Default + serde::de::DeserializeOwned>(var: &str) -> Result<T> {
    match std::env::var(var) {
        Ok(value) => serde_json::from_str(&value).map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(T::default()),
    }
}
