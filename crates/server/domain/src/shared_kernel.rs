pub use artzain_shared::*;

use crate::driver::DriverError;
use crate::policies::PolicyViolation;

/// Domain errors
#[derive(thiserror::Error, Debug)]
pub enum DomainError {
    #[error("Workload not found: {workload_id}")]
    WorkloadNotFound { workload_id: WorkloadId },

    #[error("Cluster not found: {cluster_id}")]
    ClusterNotFound { cluster_id: ClusterId },

    #[error("Deployment not found: {deployment_id}")]
    DeploymentNotFound { deployment_id: DeploymentId },

    #[error("Policy not found: {policy_id}")]
    PolicyNotFound { policy_id: PolicyId },

    #[error("Action plan not found: {plan_id}")]
    PlanNotFound { plan_id: PlanId },

    #[error("Canary rollout not found: {canary_id}")]
    CanaryNotFound { canary_id: CanaryId },

    #[error("Invalid {entity} state transition from {from} to {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Plan {plan_id} rejected by policy ({} violations)", violations.len())]
    PolicyRejected {
        plan_id: PlanId,
        violations: Vec<PolicyViolation>,
    },

    #[error("Deployment {deployment_id} already has an active canary: {canary_id}")]
    CanaryAlreadyActive {
        deployment_id: DeploymentId,
        canary_id: CanaryId,
    },

    #[error("Canary {canary_id} is already terminal ({phase})")]
    CanaryAlreadyTerminal { canary_id: CanaryId, phase: String },

    #[error(
        "Decision affects {affected_percent:.0}% of the fleet, above the allowed {max_percent}%"
    )]
    BlastRadiusExceeded {
        affected_percent: f64,
        max_percent: u8,
    },

    #[error("Decision is awaiting approval")]
    AwaitingApproval,

    #[error("Decision timed out after {seconds}s")]
    DecisionTimeout { seconds: u64 },

    #[error("Plan execution was cancelled")]
    Cancelled,

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Infrastructure error: {message}")]
    InfrastructureError { message: String },
}

impl From<serde_json::Error> for DomainError {
    fn from(error: serde_json::Error) -> Self {
        Self::InfrastructureError {
            message: format!("Serialization error: {}", error),
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
