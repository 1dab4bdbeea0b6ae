//! Canary rollout state.
//!
//! The state lives here; the controller in the application layer drives
//! it. Externally the state is observable only through read-only
//! snapshots handed out by the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use artzain_shared::config::CanaryDefaults;

use crate::shared_kernel::{CanaryId, CanaryPhase, DeploymentId, DomainError, Result};

/// Configuration of a single canary rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryConfig {
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

impl Default for CanaryConfig {
    fn default() -> Self {
        CanaryDefaults::default().into()
    }
}

impl From<CanaryDefaults> for CanaryConfig {
    fn from(d: CanaryDefaults) -> Self {
        Self {
            initial_percent: d.initial_percent,
            increment_percent: d.increment_percent,
            step_duration_seconds: d.step_duration_seconds,
            min_health_score: d.min_health_score,
            analysis_samples: d.analysis_samples,
            max_duration_seconds: d.max_duration_seconds,
            auto_promote: d.auto_promote,
            abort_on_failure: d.abort_on_failure,
        }
    }
}

impl CanaryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.initial_percent) {
            return Err(DomainError::InvalidInput {
                field: "canary.initial_percent".to_string(),
                reason: format!("must be in 1..=100, got {}", self.initial_percent),
            });
        }
        if !(1..=100).contains(&self.increment_percent) {
            return Err(DomainError::InvalidInput {
                field: "canary.increment_percent".to_string(),
                reason: format!("must be in 1..=100, got {}", self.increment_percent),
            });
        }
        if self.analysis_samples == 0 {
            return Err(DomainError::InvalidInput {
                field: "canary.analysis_samples".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.step_duration_seconds == 0 || self.max_duration_seconds == 0 {
            return Err(DomainError::InvalidInput {
                field: "canary.durations".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_health_score) {
            return Err(DomainError::InvalidInput {
                field: "canary.min_health_score".to_string(),
                reason: format!("must be in 0.0..=1.0, got {}", self.min_health_score),
            });
        }
        Ok(())
    }

    /// Interval between two health samples within one step.
    pub fn sample_interval_seconds(&self) -> u64 {
        (self.step_duration_seconds / self.analysis_samples as u64).max(1)
    }
}

/// One recorded step transition of a canary rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryStepRecord {
    pub step: u32,
    pub percent: u8,
    pub score: f64,
    pub phase: CanaryPhase,
    pub recorded_at: DateTime<Utc>,
}

/// State of one canary rollout.
///
/// Created at rollout start, terminal at `Promoted` or `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryState {
    pub id: CanaryId,
    pub deployment_id: DeploymentId,
    pub phase: CanaryPhase,
    /// Current canary traffic percentage (0-100)
    pub canary_percent: u8,
    pub step: u32,
    pub last_health_score: Option<f64>,
    pub history: Vec<CanaryStepRecord>,
    pub abort_reason: Option<String>,
    pub config: CanaryConfig,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CanaryState {
    pub fn new(deployment_id: DeploymentId, config: CanaryConfig) -> Self {
        Self {
            id: CanaryId::new(),
            deployment_id,
            phase: CanaryPhase::Initializing,
            canary_percent: 0,
            step: 0,
            last_health_score: None,
            history: Vec::new(),
            abort_reason: None,
            config,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Advance the phase, enforcing the canary state machine, and record
    /// the transition in the step history.
    pub fn advance_phase(&mut self, new_phase: CanaryPhase) -> Result<()> {
        if !self.phase.can_transition_to(&new_phase) {
            return Err(DomainError::InvalidStateTransition {
                entity: "canary",
                from: self.phase.to_string(),
                to: new_phase.to_string(),
            });
        }
        self.phase = new_phase;
        self.history.push(CanaryStepRecord {
            step: self.step,
            percent: self.canary_percent,
            score: self.last_health_score.unwrap_or(0.0),
            phase: new_phase,
            recorded_at: Utc::now(),
        });
        if new_phase.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn record_score(&mut self, score: f64) {
        self.last_health_score = Some(score);
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
