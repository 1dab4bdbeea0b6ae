//! Deployment entity: the live instance of a workload on a cluster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canary::CanaryConfig;
use crate::shared_kernel::{
    CanaryId, ClusterId, DeploymentId, DeploymentStatus, DomainError, Result, WorkloadId,
};

/// Rollout strategy applied to update decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    Rolling,
    Canary,
    BlueGreen,
}

impl Default for DeploymentStrategy {
    fn default() -> Self {
        Self::Rolling
    }
}

/// The live instance of a workload on a cluster.
///
/// Status is mutated only by the plan executor, the canary controller or
/// the rollback controller; exactly one of them drives a deployment at a
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub workload_id: WorkloadId,
    pub cluster_id: ClusterId,
    pub namespace: String,
    pub replicas: i32,
    pub strategy: DeploymentStrategy,
    pub canary_config: Option<CanaryConfig>,
    pub status: DeploymentStatus,
    /// Lookup to the active canary, if any. Not an ownership edge: the
    /// canary record is keyed independently by its own id.
    pub active_canary_id: Option<CanaryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(
        workload_id: WorkloadId,
        cluster_id: ClusterId,
        namespace: impl Into<String>,
        replicas: i32,
        strategy: DeploymentStrategy,
    ) -> Result<Self> {
        if replicas < 0 {
            return Err(DomainError::InvalidInput {
                field: "deployment.replicas".to_string(),
                reason: format!("must not be negative, got {}", replicas),
            });
        }
        let now = Utc::now();
        Ok(Self {
            id: DeploymentId::new(),
            workload_id,
            cluster_id,
            namespace: namespace.into(),
            replicas,
            strategy,
            canary_config: None,
            status: DeploymentStatus::Pending,
            active_canary_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_canary_config(mut self, config: CanaryConfig) -> Self {
        self.canary_config = Some(config);
        self
    }

    /// Advance the status, enforcing the deployment state machine.
    pub fn transition(&mut self, new_status: DeploymentStatus) -> Result<()> {
        if !self.status.can_transition_to(&new_status) {
            return Err(DomainError::InvalidStateTransition {
                entity: "deployment",
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_replicas(&mut self, replicas: i32) -> Result<()> {
        if replicas < 0 {
            return Err(DomainError::InvalidInput {
                field: "deployment.replicas".to_string(),
                reason: format!("must not be negative, got {}", replicas),
            });
        }
        self.replicas = replicas;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attach the active canary. At most one canary per deployment.
    pub fn attach_canary(&mut self, canary_id: CanaryId) -> Result<()> {
        if let Some(existing) = self.active_canary_id {
            return Err(DomainError::CanaryAlreadyActive {
                deployment_id: self.id,
                canary_id: existing,
            });
        }
        self.active_canary_id = Some(canary_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn detach_canary(&mut self) {
        self.active_canary_id = None;
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
