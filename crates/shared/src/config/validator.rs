//! Configuration validation

use super::dto::ControllerConfigDto;
use super::error::{ConfigError, Result};

const KNOWN_MODES: &[&str] = &["enforce", "dry_run", "shadow"];

/// Validate a loaded controller configuration.
///
/// Checks cross-field consistency that the per-field parsers cannot see:
/// weight sums, percentage ranges, nonzero intervals and the evaluation
/// mode vocabulary.
pub fn validate_controller_config(config: &ControllerConfigDto) -> Result<()> {
    validate_mode(&config.executor.policy_default_mode)?;

    if config.executor.max_concurrent_plans == 0 {
        return Err(ConfigError::Validation(
            "max_concurrent_plans must be greater than zero".to_string(),
        ));
    }

    if config.executor.per_decision_timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "per_decision_timeout_seconds must be greater than zero".to_string(),
        ));
    }

    validate_percent("canary.initial_percent", config.canary.initial_percent)?;
    validate_percent("canary.increment_percent", config.canary.increment_percent)?;

    if config.canary.analysis_samples == 0 {
        return Err(ConfigError::Validation(
            "canary.analysis_samples must be greater than zero".to_string(),
        ));
    }

    if config.canary.step_duration_seconds == 0 || config.canary.max_duration_seconds == 0 {
        return Err(ConfigError::Validation(
            "canary durations must be greater than zero".to_string(),
        ));
    }

    validate_score("canary.min_health_score", config.canary.min_health_score)?;
    validate_score("rollback.min_health_score", config.rollback.min_health_score)?;

    if config.rollback.check_interval_seconds == 0 {
        return Err(ConfigError::Validation(
            "rollback.check_interval_seconds must be greater than zero".to_string(),
        ));
    }

    if config.rollback.consecutive_bad_threshold == 0 {
        return Err(ConfigError::Validation(
            "rollback.consecutive_bad_threshold must be greater than zero".to_string(),
        ));
    }

    let weight_sum =
        config.health.readiness + config.health.restarts + config.health.bad_states;
    if (weight_sum - 1.0).abs() > 1e-6 {
        return Err(ConfigError::Validation(format!(
            "health weights must sum to 1.0, got {}",
            weight_sum
        )));
    }

    Ok(())
}

fn validate_mode(mode: &str) -> Result<()> {
    if KNOWN_MODES.contains(&mode) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "unknown policy evaluation mode '{}', expected one of {:?}",
            mode, KNOWN_MODES
        )))
    }
}

fn validate_percent(field: &str, value: u8) -> Result<()> {
    if (1..=100).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{} must be in 1..=100, got {}",
            field, value
        )))
    }
}

fn validate_score(field: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{} must be in 0.0..=1.0, got {}",
            field, value
        )))
    }
}
