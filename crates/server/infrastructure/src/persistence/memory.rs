//! In-memory repositories.
//!
//! `RwLock<HashMap>` implementations of the persistence ports.
//! Transactional at the single-entity level with read-your-writes, as
//! the ports require.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use artzain_server_domain::clusters::Cluster;
use artzain_server_domain::deployments::Deployment;
use artzain_server_domain::plans::{ActionPlan, PlanResult};
use artzain_server_domain::policies::Policy;
use artzain_server_domain::repository::{
    ClusterRepository, DeploymentRepository, PlanRepository, PolicyRepository,
    WorkloadRepository,
};
use artzain_server_domain::shared_kernel::{
    ClusterId, DeploymentId, PlanId, PolicyId, Result, WorkloadId,
};
use artzain_server_domain::workloads::Workload;

#[derive(Default)]
pub struct InMemoryWorkloadRepository {
    items: RwLock<HashMap<WorkloadId, Workload>>,
}

impl InMemoryWorkloadRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkloadRepository for InMemoryWorkloadRepository {
    async fn save(&self, workload: &Workload) -> Result<()> {
        self.items
            .write()
            .await
            .insert(workload.id, workload.clone());
        Ok(())
    }

    async fn get(&self, id: WorkloadId) -> Result<Option<Workload>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workload>> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: WorkloadId) -> Result<bool> {
        Ok(self.items.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryClusterRepository {
    items: RwLock<HashMap<ClusterId, Cluster>>,
}

impl InMemoryClusterRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterRepository for InMemoryClusterRepository {
    async fn save(&self, cluster: &Cluster) -> Result<()> {
        self.items.write().await.insert(cluster.id, cluster.clone());
        Ok(())
    }

    async fn get(&self, id: ClusterId) -> Result<Option<Cluster>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Cluster>> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: ClusterId) -> Result<bool> {
        Ok(self.items.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryDeploymentRepository {
    items: RwLock<HashMap<DeploymentId, Deployment>>,
}

impl InMemoryDeploymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryDeploymentRepository {
    async fn save(&self, deployment: &Deployment) -> Result<()> {
        self.items
            .write()
            .await
            .insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn get(&self, id: DeploymentId) -> Result<Option<Deployment>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Deployment>> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn list_active(&self) -> Result<Vec<Deployment>> {
        Ok(self
            .items
            .read()
            .await
            .values()
            .filter(|d| d.status.is_active())
            .cloned()
            .collect())
    }

    async fn find_by_workload(&self, workload_id: WorkloadId) -> Result<Vec<Deployment>> {
        Ok(self
            .items
            .read()
            .await
            .values()
            .filter(|d| d.workload_id == workload_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: DeploymentId) -> Result<bool> {
        Ok(self.items.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryPolicyRepository {
    items: RwLock<HashMap<PolicyId, Policy>>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn save(&self, policy: &Policy) -> Result<()> {
        self.items.write().await.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get(&self, id: PolicyId) -> Result<Option<Policy>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Policy>> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn list_enabled(&self) -> Result<Vec<Policy>> {
        Ok(self
            .items
            .read()
            .await
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: PolicyId) -> Result<bool> {
        Ok(self.items.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryPlanRepository {
    plans: RwLock<HashMap<PlanId, ActionPlan>>,
    results: RwLock<HashMap<PlanId, PlanResult>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn save(&self, plan: &ActionPlan) -> Result<()> {
        self.plans.write().await.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get(&self, id: PlanId) -> Result<Option<ActionPlan>> {
        Ok(self.plans.read().await.get(&id).cloned())
    }

    async fn save_result(&self, result: &PlanResult) -> Result<()> {
        self.results
            .write()
            .await
            .insert(result.plan_id, result.clone());
        Ok(())
    }

    async fn get_result(&self, id: PlanId) -> Result<Option<PlanResult>> {
        Ok(self.results.read().await.get(&id).cloned())
    }
}
