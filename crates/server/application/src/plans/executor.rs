//! Plan executor.
//!
//! Receives action plans, consults the policy engine, dispatches each
//! decision through the canary controller or the cluster driver, emits
//! audit events and stores the outcome.
//!
//! Concurrency: at most `max_concurrent_plans` plans execute at once
//! (semaphore); plans sharing a target label set serialize on per-target
//! mutexes, acquired in sorted order so overlapping plans cannot
//! deadlock. Decisions within one plan run strictly in declared order.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, Semaphore};
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{info, warn};

use artzain_shared::config::ExecutorConfig;
use artzain_server_domain::deployments::{Deployment, DeploymentStrategy};
use artzain_server_domain::driver::{
    managed_labels, ClusterDriver, ResourceKind, ResourcePatch, ResourceSpec,
};
use artzain_server_domain::event_bus::EventBus;
use artzain_server_domain::events::DomainEvent;
use artzain_server_domain::plans::{
    ActionPlan, Decision, DecisionOutcome, DecisionParams, DecisionStatus, PlanResult,
};
use artzain_server_domain::policies::EvaluationMode;
use artzain_server_domain::repository::{
    DeploymentRepository, PlanRepository, WorkloadRepository,
};
use artzain_server_domain::rollback::{RollbackReason, RollbackRecord};
use artzain_server_domain::shared_kernel::{DomainError, PlanId, PlanStatus, Result};
use artzain_server_domain::workloads::Workload;
use tokio_util::sync::CancellationToken;

use crate::canary::CanaryController;
use crate::emitter::EventEmitter;
use crate::policy::PolicyEngine;

/// Annotation used to trigger a rolling restart.
const RESTART_ANNOTATION: &str = "artzain.io/restarted-at";
/// Annotation marking a resource as draining (pods unschedulable).
const DRAIN_ANNOTATION: &str = "artzain.io/drain";

/// Executor tunables, derived from the controller configuration.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_concurrent_plans: usize,
    pub default_timeout_seconds: u64,
    pub default_mode: EvaluationMode,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_plans: 16,
            default_timeout_seconds: 300,
            default_mode: EvaluationMode::Enforce,
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_concurrent_plans: config.max_concurrent_plans,
            default_timeout_seconds: config.per_decision_timeout_seconds,
            default_mode: config
                .policy_default_mode
                .parse()
                .unwrap_or(EvaluationMode::Enforce),
        }
    }
}

/// Policy-validated dispatch of action plans.
pub struct PlanExecutor {
    engine: Arc<PolicyEngine>,
    driver: Arc<dyn ClusterDriver>,
    canary: Arc<CanaryController>,
    workloads: Arc<dyn WorkloadRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    plans: Arc<dyn PlanRepository>,
    bus: Arc<dyn EventBus>,
    settings: ExecutorSettings,
    semaphore: Arc<Semaphore>,
    target_locks: DashMap<String, Arc<Mutex<()>>>,
    approvals: DashMap<(PlanId, usize), ()>,
    approval_notify: Arc<Notify>,
    cancel_tokens: DashMap<PlanId, CancellationToken>,
}

impl PlanExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<PolicyEngine>,
        driver: Arc<dyn ClusterDriver>,
        canary: Arc<CanaryController>,
        workloads: Arc<dyn WorkloadRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        plans: Arc<dyn PlanRepository>,
        bus: Arc<dyn EventBus>,
        settings: ExecutorSettings,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_plans));
        Arc::new(Self {
            engine,
            driver,
            canary,
            workloads,
            deployments,
            plans,
            bus,
            settings,
            semaphore,
            target_locks: DashMap::new(),
            approvals: DashMap::new(),
            approval_notify: Arc::new(Notify::new()),
            cancel_tokens: DashMap::new(),
        })
    }

    /// Submit a plan for execution. A plan id that already ran to a
    /// terminal status returns its stored result unchanged.
    pub async fn submit(&self, mut plan: ActionPlan) -> Result<PlanResult> {
        if let Some(stored) = self.plans.get_result(plan.id).await? {
            info!(plan_id = %plan.id, "plan already executed, returning stored result");
            return Ok(stored);
        }
        if self.plans.get(plan.id).await?.is_some() {
            return Err(DomainError::InvalidInput {
                field: "plan.id".to_string(),
                reason: "plan is already submitted".to_string(),
            });
        }

        let mode = plan.mode.unwrap_or(self.settings.default_mode);
        let emitter = EventEmitter::new(self.bus.clone(), format!("executor-{}", plan.id));

        self.plans.save(&plan).await?;
        emitter
            .emit(DomainEvent::PlanSubmitted {
                plan_id: plan.id,
                source: plan.source,
                decision_count: plan.decisions.len(),
                meta: emitter.next_meta(plan.correlation_id.clone()),
            })
            .await;

        // Worker cap, then per-target serialization
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DomainError::InfrastructureError {
                message: "executor semaphore closed".to_string(),
            })?;
        let _guards = self.lock_targets(&plan).await;

        let token = CancellationToken::new();
        self.cancel_tokens.insert(plan.id, token.clone());
        let result = self.execute(&mut plan, mode, &emitter, &token).await;
        self.cancel_tokens.remove(&plan.id);
        result
    }

    /// Stored (or in-flight) result of a plan.
    pub async fn plan_status(&self, plan_id: PlanId) -> Result<PlanResult> {
        if let Some(stored) = self.plans.get_result(plan_id).await? {
            return Ok(stored);
        }
        let plan = self
            .plans
            .get(plan_id)
            .await?
            .ok_or(DomainError::PlanNotFound { plan_id })?;
        Ok(PlanResult {
            plan_id,
            status: plan.status,
            approved: !matches!(plan.status, PlanStatus::Pending | PlanStatus::Rejected),
            violations: Vec::new(),
            decisions: Vec::new(),
            shadow: false,
            mode: plan.mode.unwrap_or(self.settings.default_mode),
            completed_at: plan.executed_at,
        })
    }

    /// Record an approval for a decision awaiting one.
    pub fn record_approval(&self, plan_id: PlanId, decision_index: usize) {
        self.approvals.insert((plan_id, decision_index), ());
        self.approval_notify.notify_waiters();
        info!(plan_id = %plan_id, decision_index, "approval recorded");
    }

    /// Cancel an in-flight plan. Completed decisions are not reversed.
    pub fn cancel(&self, plan_id: PlanId) -> bool {
        if let Some(token) = self.cancel_tokens.get(&plan_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------

    async fn lock_targets(&self, plan: &ActionPlan) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::new();
        // Keys are sorted, so overlapping plans acquire in the same order
        for key in plan.target_keys() {
            let lock = self
                .target_locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    async fn execute(
        &self,
        plan: &mut ActionPlan,
        mode: EvaluationMode,
        emitter: &EventEmitter,
        token: &CancellationToken,
    ) -> Result<PlanResult> {
        let evaluation = self.engine.evaluate(plan, mode).await;

        for violation in &evaluation.violations {
            emitter
                .emit(DomainEvent::PolicyViolationRaised {
                    plan_id: plan.id,
                    violation: violation.clone(),
                    meta: emitter.next_meta(plan.correlation_id.clone()),
                })
                .await;
        }

        if !evaluation.approved {
            plan.transition(PlanStatus::Rejected)?;
            self.plans.save(plan).await?;
            emitter
                .emit(DomainEvent::PlanRejected {
                    plan_id: plan.id,
                    violations: evaluation.violations.clone(),
                    meta: emitter.next_meta(plan.correlation_id.clone()),
                })
                .await;
            let result = PlanResult {
                plan_id: plan.id,
                status: PlanStatus::Rejected,
                approved: false,
                violations: evaluation.violations,
                decisions: Vec::new(),
                shadow: false,
                mode,
                completed_at: Some(Utc::now()),
            };
            self.plans.save_result(&result).await?;
            return Ok(result);
        }

        plan.transition(PlanStatus::Approved)?;
        self.plans.save(plan).await?;
        emitter
            .emit(DomainEvent::PlanApproved {
                plan_id: plan.id,
                mode,
                violation_count: evaluation.violations.len(),
                meta: emitter.next_meta(plan.correlation_id.clone()),
            })
            .await;

        // Dry-run and shadow are evaluate-only: nothing is dispatched.
        // Shadow additionally tags the result and emits the audit event
        // carrying the would-be actions.
        if mode != EvaluationMode::Enforce {
            plan.transition(PlanStatus::Executing)?;
            plan.transition(PlanStatus::Completed)?;
            self.plans.save(plan).await?;

            if mode == EvaluationMode::Shadow {
                let would_execute: Vec<String> = plan
                    .decisions
                    .iter()
                    .map(|d| format!("{} {}", d.verb(), d.target.serialization_key()))
                    .collect();
                emitter
                    .emit(DomainEvent::PlanShadowExecuted {
                        plan_id: plan.id,
                        would_execute,
                        violation_count: evaluation.violations.len(),
                        meta: emitter.next_meta(plan.correlation_id.clone()),
                    })
                    .await;
            } else {
                emitter
                    .emit(DomainEvent::PlanCompleted {
                        plan_id: plan.id,
                        outcomes: Vec::new(),
                        meta: emitter.next_meta(plan.correlation_id.clone()),
                    })
                    .await;
            }

            let result = PlanResult {
                plan_id: plan.id,
                status: PlanStatus::Completed,
                approved: true,
                violations: evaluation.violations,
                decisions: Vec::new(),
                shadow: mode == EvaluationMode::Shadow,
                mode,
                completed_at: Some(Utc::now()),
            };
            self.plans.save_result(&result).await?;
            return Ok(result);
        }

        plan.transition(PlanStatus::Executing)?;
        self.plans.save(plan).await?;

        let mut outcomes: Vec<DecisionOutcome> = Vec::new();
        let mut abort_rest = false;

        for (index, decision) in plan.decisions.iter().enumerate() {
            if abort_rest {
                let outcome = DecisionOutcome {
                    index,
                    verb: decision.verb(),
                    status: DecisionStatus::Skipped,
                    message: Some("skipped after earlier failure".to_string()),
                    duration_ms: 0,
                };
                emitter
                    .emit(DomainEvent::DecisionSkipped {
                        plan_id: plan.id,
                        index,
                        verb: decision.verb(),
                        reason: "skipped after earlier failure".to_string(),
                        meta: emitter.next_meta(plan.correlation_id.clone()),
                    })
                    .await;
                outcomes.push(outcome);
                continue;
            }

            emitter
                .emit(DomainEvent::DecisionStarted {
                    plan_id: plan.id,
                    index,
                    verb: decision.verb(),
                    meta: emitter.next_meta(plan.correlation_id.clone()),
                })
                .await;

            let started = Instant::now();
            let outcome = match self
                .run_decision(plan, index, decision, emitter, token)
                .await
            {
                Ok(outcome) => outcome,
                Err(DomainError::Cancelled) => {
                    return self.finish_cancelled(plan, mode, emitter, outcomes).await;
                }
                Err(other) => DecisionOutcome {
                    index,
                    verb: decision.verb(),
                    status: DecisionStatus::Failed,
                    message: Some(other.to_string()),
                    duration_ms: started.elapsed().as_millis() as u64,
                },
            };

            match outcome.status {
                DecisionStatus::Succeeded => {
                    emitter
                        .emit(DomainEvent::DecisionCompleted {
                            plan_id: plan.id,
                            index,
                            verb: decision.verb(),
                            duration_ms: outcome.duration_ms,
                            meta: emitter.next_meta(plan.correlation_id.clone()),
                        })
                        .await;
                }
                DecisionStatus::Failed => {
                    emitter
                        .emit(DomainEvent::DecisionFailed {
                            plan_id: plan.id,
                            index,
                            verb: decision.verb(),
                            message: outcome
                                .message
                                .clone()
                                .unwrap_or_else(|| "decision failed".to_string()),
                            meta: emitter.next_meta(plan.correlation_id.clone()),
                        })
                        .await;
                    if plan.abort_on_first_failure {
                        abort_rest = true;
                    }
                }
                DecisionStatus::Skipped | DecisionStatus::AwaitingApproval => {
                    emitter
                        .emit(DomainEvent::DecisionSkipped {
                            plan_id: plan.id,
                            index,
                            verb: decision.verb(),
                            reason: outcome
                                .message
                                .clone()
                                .unwrap_or_else(|| "skipped".to_string()),
                            meta: emitter.next_meta(plan.correlation_id.clone()),
                        })
                        .await;
                }
            }
            outcomes.push(outcome);
        }

        let all_succeeded = outcomes
            .iter()
            .all(|o| o.status == DecisionStatus::Succeeded);
        let final_status = if all_succeeded {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        plan.transition(final_status)?;
        self.plans.save(plan).await?;

        if all_succeeded {
            emitter
                .emit(DomainEvent::PlanCompleted {
                    plan_id: plan.id,
                    outcomes: outcomes.clone(),
                    meta: emitter.next_meta(plan.correlation_id.clone()),
                })
                .await;
        } else {
            emitter
                .emit(DomainEvent::PlanFailed {
                    plan_id: plan.id,
                    outcomes: outcomes.clone(),
                    message: "one or more decisions did not succeed".to_string(),
                    meta: emitter.next_meta(plan.correlation_id.clone()),
                })
                .await;
        }

        let result = PlanResult {
            plan_id: plan.id,
            status: final_status,
            approved: true,
            violations: evaluation.violations,
            decisions: outcomes,
            shadow: false,
            mode,
            completed_at: Some(Utc::now()),
        };
        self.plans.save_result(&result).await?;
        Ok(result)
    }

    async fn finish_cancelled(
        &self,
        plan: &mut ActionPlan,
        mode: EvaluationMode,
        emitter: &EventEmitter,
        outcomes: Vec<DecisionOutcome>,
    ) -> Result<PlanResult> {
        warn!(plan_id = %plan.id, "plan cancelled");
        plan.transition(PlanStatus::Cancelled)?;
        self.plans.save(plan).await?;
        emitter
            .emit(DomainEvent::PlanCancelled {
                plan_id: plan.id,
                meta: emitter.next_meta(plan.correlation_id.clone()),
            })
            .await;
        let result = PlanResult {
            plan_id: plan.id,
            status: PlanStatus::Cancelled,
            approved: true,
            violations: Vec::new(),
            decisions: outcomes,
            shadow: false,
            mode,
            completed_at: Some(Utc::now()),
        };
        self.plans.save_result(&result).await?;
        Ok(result)
    }

    /// One decision: approval gate, blast-radius check, then dispatch
    /// under the decision timeout and the plan's cancellation token.
    async fn run_decision(
        &self,
        plan: &ActionPlan,
        index: usize,
        decision: &Decision,
        emitter: &EventEmitter,
        token: &CancellationToken,
    ) -> Result<DecisionOutcome> {
        let started = Instant::now();

        if decision.safety.requires_approval
            && !self.wait_for_approval(plan.id, index, decision, token).await?
        {
            return Ok(DecisionOutcome {
                index,
                verb: decision.verb(),
                status: DecisionStatus::AwaitingApproval,
                message: Some(format!(
                    "approval not received within {}s",
                    decision.safety.ttl_seconds
                )),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        if let Some(max_percent) = decision.safety.max_blast_radius_percent {
            let affected = self.blast_radius_percent(decision).await;
            if affected > max_percent as f64 {
                return Ok(DecisionOutcome {
                    index,
                    verb: decision.verb(),
                    status: DecisionStatus::Skipped,
                    message: Some(format!(
                        "blast_radius_exceeded: decision affects {:.0}% of the fleet, above {}%",
                        affected, max_percent
                    )),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        let timeout_seconds = decision
            .params
            .timeout_seconds()
            .unwrap_or(self.settings.default_timeout_seconds);

        let dispatched = tokio::select! {
            _ = token.cancelled() => return Err(DomainError::Cancelled),
            result = timeout(
                Duration::from_secs(timeout_seconds),
                self.dispatch(plan, decision, emitter),
            ) => result,
        };

        let outcome = match dispatched {
            Err(_) => DecisionOutcome {
                index,
                verb: decision.verb(),
                status: DecisionStatus::Failed,
                message: Some(
                    DomainError::DecisionTimeout {
                        seconds: timeout_seconds,
                    }
                    .to_string(),
                ),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Ok(message)) => DecisionOutcome {
                index,
                verb: decision.verb(),
                status: DecisionStatus::Succeeded,
                message: Some(message),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Err(error)) => DecisionOutcome {
                index,
                verb: decision.verb(),
                status: DecisionStatus::Failed,
                message: Some(error.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        };
        Ok(outcome)
    }

    /// Wait for an approval record up to the decision's ttl. Returns
    /// false on expiry.
    async fn wait_for_approval(
        &self,
        plan_id: PlanId,
        index: usize,
        decision: &Decision,
        token: &CancellationToken,
    ) -> Result<bool> {
        let deadline = Instant::now() + Duration::from_secs(decision.safety.ttl_seconds);
        loop {
            if self.approvals.contains_key(&(plan_id, index)) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = token.cancelled() => return Err(DomainError::Cancelled),
                _ = self.approval_notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Fraction of the target's current fleet this decision touches.
    async fn blast_radius_percent(&self, decision: &Decision) -> f64 {
        let current = match self.resolve_deployment(decision).await {
            Some(deployment) => deployment.replicas.max(1),
            None => return 100.0,
        };
        match &decision.params {
            DecisionParams::Scale(p) => {
                ((p.replicas - current).abs() as f64 / current as f64) * 100.0
            }
            // Everything else replaces or disturbs the whole fleet
            _ => 100.0,
        }
    }

    async fn resolve_workload(&self, decision: &Decision) -> Result<Workload> {
        let workload_id = decision
            .target
            .workload_id
            .ok_or_else(|| DomainError::InvalidInput {
                field: "decision.target.workload_id".to_string(),
                reason: "decision target names no workload".to_string(),
            })?;
        self.workloads
            .get(workload_id)
            .await?
            .ok_or(DomainError::WorkloadNotFound { workload_id })
    }

    async fn resolve_deployment(&self, decision: &Decision) -> Option<Deployment> {
        let workload_id = decision.target.workload_id?;
        let mut list = self
            .deployments
            .find_by_workload(workload_id)
            .await
            .ok()?;
        list.sort_by_key(|d| std::cmp::Reverse(d.updated_at));
        list.into_iter().find(|d| !d.is_terminal())
    }

    /// Route a decision to the canary controller or the driver.
    async fn dispatch(
        &self,
        plan: &ActionPlan,
        decision: &Decision,
        emitter: &EventEmitter,
    ) -> Result<String> {
        let workload = self.resolve_workload(decision).await?;
        let deployment = self.resolve_deployment(decision).await;
        let name = workload.name.clone();
        let namespace = decision.target.namespace.clone();

        match &decision.params {
            DecisionParams::Scale(p) => {
                self.driver.scale(&name, &namespace, p.replicas).await?;
                if let Some(mut deployment) = deployment {
                    deployment.set_replicas(p.replicas)?;
                    self.deployments.save(&deployment).await?;
                    emitter
                        .emit(DomainEvent::DeploymentScaled {
                            deployment_id: deployment.id,
                            replicas: p.replicas,
                            meta: emitter.next_meta(plan.correlation_id.clone()),
                        })
                        .await;
                }
                Ok(format!("scaled {} to {} replicas", name, p.replicas))
            }

            DecisionParams::Update(p) => {
                if let Some(deployment) = &deployment {
                    if deployment.strategy == DeploymentStrategy::Canary {
                        let canary_id = self
                            .canary
                            .start(deployment.id, p.clone(), deployment.canary_config.clone())
                            .await?;
                        return Ok(format!("canary rollout {} started", canary_id));
                    }
                }
                let patch = ResourcePatch {
                    image: p.image.clone(),
                    replicas: p.replicas,
                    env: p.env.clone(),
                    labels: None,
                    annotations: None,
                };
                self.driver.update(&name, &namespace, &patch).await?;
                if let Some(image) = &p.image {
                    let mut workload = workload.clone();
                    workload.set_image(image);
                    self.workloads.save(&workload).await?;
                }
                if let Some(deployment) = &deployment {
                    emitter
                        .emit(DomainEvent::DeploymentUpdated {
                            deployment_id: deployment.id,
                            meta: emitter.next_meta(plan.correlation_id.clone()),
                        })
                        .await;
                }
                Ok(format!("updated {}", name))
            }

            DecisionParams::Rollback(p) => {
                let state = self.driver.rollback(&name, &namespace, p.revision).await?;
                if let Some(mut deployment) = deployment {
                    let record =
                        RollbackRecord::new(deployment.id, RollbackReason::Manual, plan.source.to_string())
                            .with_revisions(None, Some(state.revision));
                    if deployment
                        .transition(artzain_shared::DeploymentStatus::RollingBack)
                        .is_ok()
                    {
                        let _ = deployment
                            .transition(artzain_shared::DeploymentStatus::RolledBack);
                    }
                    self.deployments.save(&deployment).await?;
                    emitter
                        .emit(DomainEvent::DeploymentRolledBack {
                            deployment_id: deployment.id,
                            record,
                            meta: emitter.next_meta(plan.correlation_id.clone()),
                        })
                        .await;
                }
                Ok(format!("rolled back {} to revision {}", name, state.revision))
            }

            DecisionParams::Reschedule(_) => {
                self.driver
                    .delete(ResourceKind::Deployment, &name, &namespace, None)
                    .await?;
                let spec = resource_spec_for(&workload, &namespace, deployment.as_ref());
                self.driver.create(&spec).await?;
                if let Some(deployment) = &deployment {
                    emitter
                        .emit(DomainEvent::DeploymentDeleted {
                            deployment_id: deployment.id,
                            meta: emitter.next_meta(plan.correlation_id.clone()),
                        })
                        .await;
                    emitter
                        .emit(DomainEvent::DeploymentCreated {
                            deployment_id: deployment.id,
                            meta: emitter.next_meta(plan.correlation_id.clone()),
                        })
                        .await;
                }
                Ok(format!("rescheduled {}", name))
            }

            DecisionParams::Drain(_) => {
                let patch = ResourcePatch::annotation(DRAIN_ANNOTATION, Utc::now().to_rfc3339());
                self.driver.update(&name, &namespace, &patch).await?;

                // Await pod exit within the decision ttl
                let deadline =
                    Instant::now() + Duration::from_secs(decision.safety.ttl_seconds);
                loop {
                    let pods = self.driver.list_pods(&name, &namespace).await?;
                    if pods.is_empty() {
                        return Ok(format!("drained {}", name));
                    }
                    if Instant::now() >= deadline {
                        return Err(DomainError::DecisionTimeout {
                            seconds: decision.safety.ttl_seconds,
                        });
                    }
                    sleep(Duration::from_secs(2)).await;
                }
            }

            DecisionParams::Restart(_) => {
                let patch =
                    ResourcePatch::annotation(RESTART_ANNOTATION, Utc::now().to_rfc3339());
                self.driver.update(&name, &namespace, &patch).await?;
                Ok(format!("restarted {}", name))
            }
        }
    }
}

/// Rebuild the managed resource spec of a workload, labels preserved.
fn resource_spec_for(
    workload: &Workload,
    namespace: &str,
    deployment: Option<&Deployment>,
) -> ResourceSpec {
    let labels: BTreeMap<String, String> = managed_labels(&workload.id.to_string());
    let mut spec = ResourceSpec::new(&workload.name, namespace, &workload.image)
        .with_replicas(deployment.map(|d| d.replicas).unwrap_or(1))
        .with_labels(labels);
    spec.env = workload.env.clone();
    spec.cpu_millis = workload.resources.cpu_millis;
    spec.memory_bytes = workload.resources.memory_bytes;
    spec.gpu_count = workload.resources.gpu_count();
    spec
}
