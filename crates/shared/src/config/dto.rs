//! Configuration Data Transfer Objects (DTOs)
//!
//! Immutable configuration DTOs passed to services via dependency
//! injection. Loaded once at startup; single source of truth for all
//! tunables of the controller core.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration DTO for the Artzain controller core.
///
/// Every field has a default, so an empty environment yields a working
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigDto {
    /// Plan executor configuration
    pub executor: ExecutorConfig,

    /// Default canary rollout configuration
    pub canary: CanaryDefaults,

    /// Default rollback monitor configuration
    pub rollback: RollbackDefaults,

    /// Health evaluator weights
    pub health: HealthWeightsConfig,

    /// Per-resource cost rates for the cost-ceiling rule
    pub price_table: PriceTableConfig,

    /// NATS messaging configuration
    pub nats: NatsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Plan executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Cap on concurrently executing plans
    pub max_concurrent_plans: usize,

    /// Default per-decision timeout (seconds), overridable per decision
    pub per_decision_timeout_seconds: u64,

    /// Evaluation mode applied when a plan does not name one
    /// (one of "enforce", "dry_run", "shadow")
    pub policy_default_mode: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_plans: 16,
            per_decision_timeout_seconds: 300,
            policy_default_mode: "enforce".to_string(),
        }
    }
}

/// Default canary rollout configuration.
///
/// Individual rollouts may override any field through the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryDefaults {
    /// Initial canary traffic percentage
    pub initial_percent: u8,
    /// Traffic increment per promoted step
    pub increment_percent: u8,
    /// Duration of each step (seconds)
    pub step_duration_seconds: u64,
    /// Minimum mean health score to promote a step
    pub min_health_score: f64,
    /// Health samples taken per step
    pub analysis_samples: u32,
    /// Hard ceiling on total rollout duration (seconds)
    pub max_duration_seconds: u64,
    /// Promote automatically once 100% is reached
    pub auto_promote: bool,
    /// Tear down the canary on failure
    pub abort_on_failure: bool,
}

impl Default for CanaryDefaults {
    fn default() -> Self {
        Self {
            initial_percent: 10,
            increment_percent: 10,
            step_duration_seconds: 300,
            min_health_score: 0.85,
            analysis_samples: 3,
            max_duration_seconds: 3600,
            auto_promote: true,
            abort_on_failure: true,
        }
    }
}

/// Default rollback monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackDefaults {
    /// Score below which a check counts as bad
    pub min_health_score: f64,
    /// Seconds between health checks
    pub check_interval_seconds: u64,
    /// Consecutive bad checks before a rollback fires
    pub consecutive_bad_threshold: u32,
    /// Seconds after a rollback during which no new rollback is issued
    pub cooldown_seconds: u64,
}

impl Default for RollbackDefaults {
    fn default() -> Self {
        Self {
            min_health_score: 0.70,
            check_interval_seconds: 30,
            consecutive_bad_threshold: 3,
            cooldown_seconds: 300,
        }
    }
}

/// Health evaluator weights. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthWeightsConfig {
    pub readiness: f64,
    pub restarts: f64,
    pub bad_states: f64,
}

impl Default for HealthWeightsConfig {
    fn default() -> Self {
        Self {
            readiness: 0.60,
            restarts: 0.25,
            bad_states: 0.15,
        }
    }
}

/// Per-resource cost rates used by the cost-ceiling policy rule.
///
/// An empty table disables the rule: with no rates, no decision can exceed
/// a ceiling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTableConfig {
    /// USD per cpu-core-hour
    #[serde(default)]
    pub cpu_core_hour: f64,
    /// USD per GiB-hour of memory
    #[serde(default)]
    pub memory_gib_hour: f64,
    /// USD per gpu-hour, keyed by SKU (e.g. "L4", "A100")
    #[serde(default)]
    pub gpu_hour: HashMap<String, f64>,
}

impl PriceTableConfig {
    pub fn is_empty(&self) -> bool {
        self.cpu_core_hour == 0.0 && self.memory_gib_hour == 0.0 && self.gpu_hour.is_empty()
    }
}

/// NATS messaging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// When false the controller runs on the in-memory bus
    pub enabled: bool,
    /// Client connection name
    pub name: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connection_timeout_secs: 5,
            enabled: false,
            name: Some("artzain-server".to_string()),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (overridden by RUST_LOG when set)
    pub level: String,
    /// Emit logs as JSON
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
