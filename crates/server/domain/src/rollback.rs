//! Rollback records and monitor configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use artzain_shared::config::RollbackDefaults;

use crate::shared_kernel::{DeploymentId, RollbackId};

/// Why a rollback was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    HealthScoreBelowThreshold,
    Manual,
    PolicyViolation,
    CanaryAbort,
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RollbackReason::HealthScoreBelowThreshold => "health_score_below_threshold",
            RollbackReason::Manual => "manual",
            RollbackReason::PolicyViolation => "policy_violation",
            RollbackReason::CanaryAbort => "canary_abort",
        };
        write!(f, "{}", s)
    }
}

/// Record of one executed rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub id: RollbackId,
    pub deployment_id: DeploymentId,
    pub from_revision: Option<i64>,
    pub to_revision: Option<i64>,
    pub reason: RollbackReason,
    /// Who or what triggered the rollback ("rollback-controller", a user, ...)
    pub triggered_by: String,
    pub triggered_at: DateTime<Utc>,
}

impl RollbackRecord {
    pub fn new(
        deployment_id: DeploymentId,
        reason: RollbackReason,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            id: RollbackId::new(),
            deployment_id,
            from_revision: None,
            to_revision: None,
            reason,
            triggered_by: triggered_by.into(),
            triggered_at: Utc::now(),
        }
    }

    pub fn with_revisions(mut self, from: Option<i64>, to: Option<i64>) -> Self {
        self.from_revision = from;
        self.to_revision = to;
        self
    }
}

/// Per-deployment rollback monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Score below which a check counts as bad
    pub min_health_score: f64,
    /// Seconds between health checks
    pub check_interval_seconds: u64,
    /// Consecutive bad checks before a rollback fires
    pub consecutive_bad_threshold: u32,
    /// Seconds after a rollback during which no new rollback is issued
    pub cooldown_seconds: u64,
    /// Revision to roll back to; the previous managed revision when absent
    pub target_revision: Option<i64>,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        RollbackDefaults::default().into()
    }
}

impl From<RollbackDefaults> for RollbackConfig {
    fn from(d: RollbackDefaults) -> Self {
        Self {
            min_health_score: d.min_health_score,
            check_interval_seconds: d.check_interval_seconds,
            consecutive_bad_threshold: d.consecutive_bad_threshold,
            cooldown_seconds: d.cooldown_seconds,
            target_revision: None,
        }
    }
}
