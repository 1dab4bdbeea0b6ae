//! Persistence ports.
//!
//! CRUD only, transactional at the single-entity level. The core assumes
//! read-your-writes; the backing store is an external collaborator.

use async_trait::async_trait;

use crate::clusters::Cluster;
use crate::deployments::Deployment;
use crate::plans::{ActionPlan, PlanResult};
use crate::policies::Policy;
use crate::shared_kernel::{ClusterId, DeploymentId, PlanId, PolicyId, Result, WorkloadId};
use crate::workloads::Workload;

#[async_trait]
pub trait WorkloadRepository: Send + Sync {
    async fn save(&self, workload: &Workload) -> Result<()>;
    async fn get(&self, id: WorkloadId) -> Result<Option<Workload>>;
    async fn list(&self) -> Result<Vec<Workload>>;
    async fn delete(&self, id: WorkloadId) -> Result<bool>;
}

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn save(&self, cluster: &Cluster) -> Result<()>;
    async fn get(&self, id: ClusterId) -> Result<Option<Cluster>>;
    async fn list(&self) -> Result<Vec<Cluster>>;
    async fn delete(&self, id: ClusterId) -> Result<bool>;
}

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn save(&self, deployment: &Deployment) -> Result<()>;
    async fn get(&self, id: DeploymentId) -> Result<Option<Deployment>>;
    async fn list(&self) -> Result<Vec<Deployment>>;
    /// Deployments whose status is active (pending, running or scaling).
    async fn list_active(&self) -> Result<Vec<Deployment>>;
    async fn find_by_workload(&self, workload_id: WorkloadId) -> Result<Vec<Deployment>>;
    async fn delete(&self, id: DeploymentId) -> Result<bool>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn save(&self, policy: &Policy) -> Result<()>;
    async fn get(&self, id: PolicyId) -> Result<Option<Policy>>;
    async fn list(&self) -> Result<Vec<Policy>>;
    async fn list_enabled(&self) -> Result<Vec<Policy>>;
    async fn delete(&self, id: PolicyId) -> Result<bool>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn save(&self, plan: &ActionPlan) -> Result<()>;
    async fn get(&self, id: PlanId) -> Result<Option<ActionPlan>>;
    /// Stored result of a plan that already ran, for idempotent re-submits.
    async fn save_result(&self, result: &PlanResult) -> Result<()>;
    async fn get_result(&self, id: PlanId) -> Result<Option<PlanResult>>;
}
