//! Controller service facade.
//!
//! The typed operation surface a thin request layer (HTTP, gRPC) calls
//! into. Wire encoding, authentication and audit storage live outside
//! the core; this facade only speaks domain types and `DomainError`.

use std::sync::Arc;

use tracing::info;

use artzain_server_domain::canary::{CanaryConfig, CanaryState};
use artzain_server_domain::clusters::Cluster;
use artzain_server_domain::deployments::Deployment;
use artzain_server_domain::event_bus::EventBus;
use artzain_server_domain::events::DomainEvent;
use artzain_server_domain::plans::{ActionPlan, PlanResult, UpdateParams};
use artzain_server_domain::policies::{EvaluationMode, Policy};
use artzain_server_domain::repository::{
    ClusterRepository, DeploymentRepository, PlanRepository, PolicyRepository,
    WorkloadRepository,
};
use artzain_server_domain::rollback::{RollbackConfig, RollbackReason, RollbackRecord};
use artzain_server_domain::shared_kernel::{
    CanaryId, ClusterId, DeploymentId, DomainError, PlanId, PlanStatus, PolicyId, Result,
    WorkloadId,
};
use artzain_server_domain::workloads::Workload;

use crate::canary::CanaryController;
use crate::emitter::EventEmitter;
use crate::plans::PlanExecutor;
use crate::policy::PolicyEngine;
use crate::rollback::RollbackController;

/// The request/response operations of the controller core.
pub struct ControllerService {
    executor: Arc<PlanExecutor>,
    canary: Arc<CanaryController>,
    rollback: Arc<RollbackController>,
    engine: Arc<PolicyEngine>,
    workloads: Arc<dyn WorkloadRepository>,
    clusters: Arc<dyn ClusterRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    policies: Arc<dyn PolicyRepository>,
    plans: Arc<dyn PlanRepository>,
    emitter: EventEmitter,
}

impl ControllerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<PlanExecutor>,
        canary: Arc<CanaryController>,
        rollback: Arc<RollbackController>,
        engine: Arc<PolicyEngine>,
        workloads: Arc<dyn WorkloadRepository>,
        clusters: Arc<dyn ClusterRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        policies: Arc<dyn PolicyRepository>,
        plans: Arc<dyn PlanRepository>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let emitter = EventEmitter::new(bus, "controller-api");
        Self {
            executor,
            canary,
            rollback,
            engine,
            workloads,
            clusters,
            deployments,
            policies,
            plans,
            emitter,
        }
    }

    // ------------------------------------------------------------------
    // Plans
    // ------------------------------------------------------------------

    /// Submit a plan. A rejection surfaces as `PolicyRejected`; the
    /// stored result remains retrievable through `get_plan_status`.
    pub async fn submit_action_plan(
        &self,
        plan: ActionPlan,
        mode: Option<EvaluationMode>,
    ) -> Result<PlanResult> {
        let plan = match mode {
            Some(mode) => plan.with_mode(mode),
            None => plan,
        };
        let plan_id = plan.id;
        let result = self.executor.submit(plan).await?;
        if result.status == PlanStatus::Rejected {
            return Err(DomainError::PolicyRejected {
                plan_id,
                violations: result.violations,
            });
        }
        Ok(result)
    }

    pub async fn get_plan_status(&self, plan_id: PlanId) -> Result<PlanResult> {
        self.executor.plan_status(plan_id).await
    }

    pub fn cancel_plan(&self, plan_id: PlanId) -> bool {
        self.executor.cancel(plan_id)
    }

    /// Approval events arrive from the hosting layer through this call.
    pub fn approve_decision(&self, plan_id: PlanId, decision_index: usize) {
        self.executor.record_approval(plan_id, decision_index);
    }

    // ------------------------------------------------------------------
    // Canary
    // ------------------------------------------------------------------

    pub async fn start_canary(
        &self,
        deployment_id: DeploymentId,
        new_spec: UpdateParams,
        config: Option<CanaryConfig>,
    ) -> Result<CanaryId> {
        self.canary.start(deployment_id, new_spec, config).await
    }

    pub async fn abort_canary(&self, canary_id: CanaryId, reason: &str) -> Result<()> {
        self.canary.abort(canary_id, reason).await
    }

    pub async fn get_canary_status(&self, canary_id: CanaryId) -> Result<CanaryState> {
        self.canary.status(canary_id).await
    }

    // ------------------------------------------------------------------
    // Policies
    // ------------------------------------------------------------------

    /// Register a policy: persisted, then live in the engine snapshot.
    pub async fn register_policy(&self, policy: Policy) -> Result<PolicyId> {
        policy.validate()?;
        self.policies.save(&policy).await?;
        self.engine.register_policy(policy)
    }

    pub async fn update_policy(&self, policy: Policy) -> Result<()> {
        policy.validate()?;
        self.policies.save(&policy).await?;
        self.engine.update_policy(policy)
    }

    pub async fn disable_policy(&self, policy_id: PolicyId) -> Result<()> {
        if let Some(mut stored) = self.policies.get(policy_id).await? {
            stored.enabled = false;
            self.policies.save(&stored).await?;
        }
        self.engine.disable_policy(policy_id)
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.engine.list_policies()
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    pub async fn register_deployment_for_rollback(
        &self,
        deployment_id: DeploymentId,
        config: Option<RollbackConfig>,
    ) -> Result<()> {
        self.rollback.register(deployment_id, config).await
    }

    pub fn unregister_deployment_for_rollback(&self, deployment_id: DeploymentId) -> bool {
        self.rollback.unregister(deployment_id)
    }

    pub async fn trigger_rollback(
        &self,
        deployment_id: DeploymentId,
        reason: RollbackReason,
        to_revision: Option<i64>,
        triggered_by: &str,
    ) -> Result<RollbackRecord> {
        self.rollback
            .trigger(deployment_id, reason, to_revision, triggered_by)
            .await
    }

    // ------------------------------------------------------------------
    // Entity CRUD pass-throughs
    // ------------------------------------------------------------------

    pub async fn create_workload(&self, workload: Workload) -> Result<WorkloadId> {
        let id = workload.id;
        self.workloads.save(&workload).await?;
        info!(workload_id = %id, name = %workload.name, "workload created");
        Ok(id)
    }

    pub async fn get_workload(&self, id: WorkloadId) -> Result<Workload> {
        self.workloads
            .get(id)
            .await?
            .ok_or(DomainError::WorkloadNotFound { workload_id: id })
    }

    pub async fn list_workloads(&self) -> Result<Vec<Workload>> {
        self.workloads.list().await
    }

    pub async fn delete_workload(&self, id: WorkloadId) -> Result<()> {
        if !self.workloads.delete(id).await? {
            return Err(DomainError::WorkloadNotFound { workload_id: id });
        }
        Ok(())
    }

    pub async fn create_cluster(&self, cluster: Cluster) -> Result<ClusterId> {
        let id = cluster.id;
        self.clusters.save(&cluster).await?;
        info!(cluster_id = %id, name = %cluster.name, "cluster registered");
        Ok(id)
    }

    pub async fn get_cluster(&self, id: ClusterId) -> Result<Cluster> {
        self.clusters
            .get(id)
            .await?
            .ok_or(DomainError::ClusterNotFound { cluster_id: id })
    }

    pub async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        self.clusters.list().await
    }

    /// Create a deployment record. Workload and cluster must exist.
    pub async fn create_deployment(&self, deployment: Deployment) -> Result<DeploymentId> {
        self.get_workload(deployment.workload_id).await?;
        self.get_cluster(deployment.cluster_id).await?;
        let id = deployment.id;
        self.deployments.save(&deployment).await?;
        self.emitter
            .emit(DomainEvent::DeploymentCreated {
                deployment_id: id,
                meta: self.emitter.next_meta(None),
            })
            .await;
        info!(deployment_id = %id, "deployment created");
        Ok(id)
    }

    pub async fn get_deployment(&self, id: DeploymentId) -> Result<Deployment> {
        self.deployments
            .get(id)
            .await?
            .ok_or(DomainError::DeploymentNotFound { deployment_id: id })
    }

    pub async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        self.deployments.list().await
    }

    pub async fn delete_deployment(&self, id: DeploymentId) -> Result<()> {
        self.rollback.unregister(id);
        if !self.deployments.delete(id).await? {
            return Err(DomainError::DeploymentNotFound { deployment_id: id });
        }
        self.emitter
            .emit(DomainEvent::DeploymentDeleted {
                deployment_id: id,
                meta: self.emitter.next_meta(None),
            })
            .await;
        Ok(())
    }

    pub async fn get_plan(&self, id: PlanId) -> Result<ActionPlan> {
        self.plans
            .get(id)
            .await?
            .ok_or(DomainError::PlanNotFound { plan_id: id })
    }
}
