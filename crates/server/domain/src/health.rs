//! Deployment health evaluation.
//!
//! Pure: given pod snapshots and the declared replica count, computes a
//! `[0.0, 1.0]` score and a status. No I/O, no retries, no clock reads:
//! the caller supplies `now`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use artzain_shared::config::HealthWeightsConfig;

use crate::driver::PodSnapshot;

/// Container waiting reasons that count as a bad state.
const BAD_WAITING_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerError",
];

/// A pod created within this window contributes its restarts to the
/// restart penalty.
const RECENT_POD_WINDOW_MINUTES: i64 = 30;

/// Restart count at which the restart penalty saturates.
const RESTART_SATURATION: f64 = 5.0;

/// Health status derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Weights of the three scoring criteria. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthWeights {
    pub readiness: f64,
    pub restarts: f64,
    pub bad_states: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            readiness: 0.60,
            restarts: 0.25,
            bad_states: 0.15,
        }
    }
}

impl From<HealthWeightsConfig> for HealthWeights {
    fn from(c: HealthWeightsConfig) -> Self {
        Self {
            readiness: c.readiness,
            restarts: c.restarts,
            bad_states: c.bad_states,
        }
    }
}

/// Result of one health evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub score: f64,
    pub status: HealthStatus,
    pub ready_pods: usize,
    pub total_pods: usize,
    pub evaluated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Score a deployment from its pod snapshots.
///
/// - 0 pods and 0 declared replicas is healthy by vacuity (score 1.0).
/// - 0 pods with declared replicas is `Unknown` (score 0.0): nothing has
///   been observed yet, so the caller must not treat the score as a
///   degradation signal.
/// - Otherwise a weighted mean of readiness, restart penalty and
///   bad-state fraction:
///   `w.readiness·ready_fraction + w.restarts·(1 − restart_penalty) + w.bad_states·(1 − bad_state_fraction)`
///   where `ready_fraction = ready / max(declared, observed)`,
///   `restart_penalty = min(1, mean_recent_restarts / 5)` and a recent
///   restart is any restart on a pod created within the last 30 minutes.
pub fn evaluate_deployment_health(
    declared_replicas: i32,
    pods: &[PodSnapshot],
    weights: &HealthWeights,
    now: DateTime<Utc>,
) -> HealthReport {
    let total_pods = pods.len();

    if total_pods == 0 {
        return if declared_replicas <= 0 {
            HealthReport {
                score: 1.0,
                status: HealthStatus::Healthy,
                ready_pods: 0,
                total_pods: 0,
                evaluated_at: now,
            }
        } else {
            HealthReport {
                score: 0.0,
                status: HealthStatus::Unknown,
                ready_pods: 0,
                total_pods: 0,
                evaluated_at: now,
            }
        };
    }

    let ready_pods = pods.iter().filter(|p| p.ready).count();
    let expected = (declared_replicas.max(0) as usize).max(total_pods);
    let ready_fraction = ready_pods as f64 / expected as f64;

    let recent_cutoff = now - Duration::minutes(RECENT_POD_WINDOW_MINUTES);
    let recent_restarts: u32 = pods
        .iter()
        .filter(|p| p.created_at.map(|c| c >= recent_cutoff).unwrap_or(false))
        .map(|p| p.restart_count)
        .sum();
    let mean_recent_restarts = recent_restarts as f64 / total_pods as f64;
    let restart_penalty = (mean_recent_restarts / RESTART_SATURATION).min(1.0);

    let bad_pods = pods.iter().filter(|p| has_bad_container_state(p)).count();
    let bad_state_fraction = bad_pods as f64 / total_pods as f64;

    let score = weights.readiness * ready_fraction
        + weights.restarts * (1.0 - restart_penalty)
        + weights.bad_states * (1.0 - bad_state_fraction);
    let score = score.clamp(0.0, 1.0);

    let status = if score >= 0.85 {
        HealthStatus::Healthy
    } else if score >= 0.60 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    };

    HealthReport {
        score,
        status,
        ready_pods,
        total_pods,
        evaluated_at: now,
    }
}

fn has_bad_container_state(pod: &PodSnapshot) -> bool {
    pod.containers.iter().any(|c| {
        c.waiting_reason
            .as_deref()
            .map(|r| BAD_WAITING_REASONS.contains(&r))
            .unwrap_or(false)
    })
}
