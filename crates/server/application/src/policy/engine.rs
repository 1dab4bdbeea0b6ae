//! Policy evaluation engine.
//!
//! Evaluates a plan's decisions against every enabled policy whose
//! selector matches the decision target. Evaluation never short-circuits
//! on the first violation: the caller always sees the full set.
//!
//! The policy set is copy-on-write: each evaluation works on the
//! snapshot taken when it starts, so concurrent registrations never
//! change a running evaluation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use artzain_shared::config::PriceTableConfig;
use artzain_server_domain::deployments::Deployment;
use artzain_server_domain::plans::{ActionPlan, Decision, DecisionParams};
use artzain_server_domain::policies::{
    evaluation_order, EvaluationMode, EvaluationResult, Policy, PolicyRule, PolicyViolation,
    RateScope, RuleAction, RuleConstraint, RuleType,
};
use artzain_server_domain::repository::{DeploymentRepository, WorkloadRepository};
use artzain_server_domain::shared_kernel::{DomainError, PolicyId, Result};
use artzain_server_domain::workloads::{ResourceRequest, Workload};

use super::observations::{ObservationSource, Observations};
use super::rate_limiter::RateLimiter;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct PolicyEngineConfig {
    /// Per-resource cost rates; an empty table makes cost_ceiling inert
    pub price_table: PriceTableConfig,
    /// Budget for one observation lookup before an evaluation_timeout
    /// violation (warn, never reject) is recorded instead
    pub observation_timeout: Duration,
}

impl Default for PolicyEngineConfig {
    fn default() -> Self {
        Self {
            price_table: PriceTableConfig::default(),
            observation_timeout: Duration::from_secs(2),
        }
    }
}

/// Policy evaluation engine. Stateless across evaluations and
/// re-entrant; a single instance serves all plan executors.
pub struct PolicyEngine {
    policies: RwLock<Arc<Vec<Policy>>>,
    rate_limiter: Arc<RateLimiter>,
    observations: Arc<dyn ObservationSource>,
    workloads: Arc<dyn WorkloadRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    config: PolicyEngineConfig,
}

impl PolicyEngine {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        observations: Arc<dyn ObservationSource>,
        workloads: Arc<dyn WorkloadRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        config: PolicyEngineConfig,
    ) -> Self {
        info!("policy engine initialized");
        Self {
            policies: RwLock::new(Arc::new(Vec::new())),
            rate_limiter,
            observations,
            workloads,
            deployments,
            config,
        }
    }

    // ------------------------------------------------------------------
    // Policy set management (copy-on-write)
    // ------------------------------------------------------------------

    /// Register a policy, replacing any previous version with the same id.
    pub fn register_policy(&self, policy: Policy) -> Result<PolicyId> {
        policy.validate()?;
        let id = policy.id;
        let mut guard = self.policies.write();
        let mut next: Vec<Policy> = guard.iter().filter(|p| p.id != id).cloned().collect();
        info!(policy_id = %id, name = %policy.name, priority = policy.priority, "registered policy");
        next.push(policy);
        *guard = Arc::new(next);
        Ok(id)
    }

    /// Replace an existing policy.
    pub fn update_policy(&self, policy: Policy) -> Result<()> {
        policy.validate()?;
        let mut guard = self.policies.write();
        if !guard.iter().any(|p| p.id == policy.id) {
            return Err(DomainError::PolicyNotFound {
                policy_id: policy.id,
            });
        }
        let mut next: Vec<Policy> =
            guard.iter().filter(|p| p.id != policy.id).cloned().collect();
        next.push(policy);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Disable a policy without removing it.
    pub fn disable_policy(&self, policy_id: PolicyId) -> Result<()> {
        let mut guard = self.policies.write();
        let mut next: Vec<Policy> = guard.as_ref().clone();
        let policy = next
            .iter_mut()
            .find(|p| p.id == policy_id)
            .ok_or(DomainError::PolicyNotFound { policy_id })?;
        policy.enabled = false;
        policy.updated_at = Utc::now();
        info!(policy_id = %policy_id, "disabled policy");
        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove a policy entirely. Returns false when unknown.
    pub fn remove_policy(&self, policy_id: PolicyId) -> bool {
        let mut guard = self.policies.write();
        let before = guard.len();
        let next: Vec<Policy> = guard.iter().filter(|p| p.id != policy_id).cloned().collect();
        let removed = next.len() < before;
        *guard = Arc::new(next);
        removed
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.policies.read().as_ref().clone()
    }

    fn snapshot(&self) -> Arc<Vec<Policy>> {
        self.policies.read().clone()
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate a plan against the current policy snapshot.
    pub async fn evaluate(&self, plan: &ActionPlan, mode: EvaluationMode) -> EvaluationResult {
        let started = Instant::now();
        let snapshot = self.snapshot();
        let ordered = evaluation_order(&snapshot);
        let mut violations: Vec<PolicyViolation> = Vec::new();

        info!(
            plan_id = %plan.id,
            policies = ordered.len(),
            %mode,
            "evaluating action plan"
        );

        for (index, decision) in plan.decisions.iter().enumerate() {
            let ctx = self.resolve_context(decision).await;
            let mut observations: Option<Observations> = None;

            for policy in ordered.iter().copied() {
                if !policy.matches_labels(&decision.target.labels) {
                    continue;
                }
                for rule in &policy.rules {
                    let violation = self
                        .check_rule(plan, decision, index, rule, policy, &ctx, &mut observations, &mut violations)
                        .await;
                    if let Some(violation) = violation {
                        warn!(
                            plan_id = %plan.id,
                            policy = %policy.name,
                            rule_type = %violation.rule_type,
                            action = %violation.action,
                            "policy violation: {}",
                            violation.message
                        );
                        violations.push(violation);
                    }
                }
            }
        }

        let approved = match mode {
            EvaluationMode::Enforce => !violations.iter().any(|v| v.action == RuleAction::Reject),
            EvaluationMode::DryRun | EvaluationMode::Shadow => true,
        };

        if mode == EvaluationMode::DryRun && !violations.is_empty() {
            info!(
                plan_id = %plan.id,
                violations = violations.len(),
                "dry run: plan would be rejected"
            );
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            plan_id = %plan.id,
            approved,
            violations = violations.len(),
            duration_ms,
            "evaluation complete"
        );

        EvaluationResult {
            plan_id: plan.id,
            approved,
            violations,
            mode,
            evaluated_at: Utc::now(),
            duration_ms,
        }
    }

    async fn resolve_context(&self, decision: &Decision) -> DecisionContext {
        let workload = match decision.target.workload_id {
            Some(id) => self.workloads.get(id).await.ok().flatten(),
            None => None,
        };
        let deployment = match decision.target.workload_id {
            Some(id) => self
                .deployments
                .find_by_workload(id)
                .await
                .ok()
                .and_then(|mut list| {
                    list.sort_by_key(|d| std::cmp::Reverse(d.updated_at));
                    list.into_iter().find(|d| !d.is_terminal())
                }),
            None => None,
        };
        DecisionContext {
            workload,
            deployment,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_rule(
        &self,
        plan: &ActionPlan,
        decision: &Decision,
        index: usize,
        rule: &PolicyRule,
        policy: &Policy,
        ctx: &DecisionContext,
        observations: &mut Option<Observations>,
        violations: &mut Vec<PolicyViolation>,
    ) -> Option<PolicyViolation> {
        match &rule.constraint {
            RuleConstraint::CostCeiling {
                max_usd_per_hour, ..
            } => self.check_cost_ceiling(decision, index, rule, policy, ctx, *max_usd_per_hour),
            RuleConstraint::Quota {
                max_replicas,
                max_cpu_cores,
                max_memory_bytes,
                max_gpu_count,
            } => {
                self.check_quota(
                    decision,
                    index,
                    rule,
                    policy,
                    ctx,
                    *max_replicas,
                    *max_cpu_cores,
                    *max_memory_bytes,
                    *max_gpu_count,
                )
                .await
            }
            RuleConstraint::Sla { min_uptime } => {
                let obs = self
                    .observations_for(decision, index, policy, observations, violations)
                    .await;
                self.check_sla(decision, index, rule, policy, &obs, *min_uptime)
            }
            RuleConstraint::Slo {
                max_latency_ms_p95,
                min_success_rate,
            } => {
                let obs = self
                    .observations_for(decision, index, policy, observations, violations)
                    .await;
                self.check_slo(
                    decision,
                    index,
                    rule,
                    policy,
                    ctx,
                    &obs,
                    *max_latency_ms_p95,
                    *min_success_rate,
                )
            }
            RuleConstraint::RateLimit {
                max_actions,
                interval_seconds,
                scope,
            } => self.check_rate_limit(
                decision,
                index,
                rule,
                policy,
                *max_actions,
                *interval_seconds,
                *scope,
            ),
            RuleConstraint::ChangeFreeze {
                windows,
                recurring,
                exempt_sources,
            } => self.check_change_freeze(
                plan, decision, index, rule, policy, windows, recurring, exempt_sources,
            ),
        }
    }

    /// Fetch observations once per decision, converting a lookup timeout
    /// into an `evaluation_timeout` violation with warn action.
    async fn observations_for(
        &self,
        decision: &Decision,
        index: usize,
        policy: &Policy,
        cache: &mut Option<Observations>,
        violations: &mut Vec<PolicyViolation>,
    ) -> Observations {
        if let Some(obs) = cache {
            return *obs;
        }
        let obs = match timeout(
            self.config.observation_timeout,
            self.observations.observe(&decision.target),
        )
        .await
        {
            Ok(obs) => obs,
            Err(_) => {
                violations.push(PolicyViolation {
                    policy_id: policy.id,
                    policy_name: policy.name.clone(),
                    rule_type: RuleType::EvaluationTimeout,
                    action: RuleAction::Warn,
                    message: format!(
                        "observation lookup timed out after {:?}",
                        self.config.observation_timeout
                    ),
                    decision_verb: decision.verb(),
                    decision_index: index,
                });
                Observations::default()
            }
        };
        *cache = Some(obs);
        obs
    }

    fn check_cost_ceiling(
        &self,
        decision: &Decision,
        index: usize,
        rule: &PolicyRule,
        policy: &Policy,
        ctx: &DecisionContext,
        max_usd_per_hour: f64,
    ) -> Option<PolicyViolation> {
        if self.config.price_table.is_empty() {
            return None;
        }
        let replicas = ctx.post_replicas(decision)?;
        let resources = ctx.post_resources(decision)?;

        let table = &self.config.price_table;
        let gpu_rate = resources
            .gpu
            .as_ref()
            .and_then(|g| table.gpu_hour.get(&g.sku).copied())
            .unwrap_or(0.0);
        let per_replica = resources.cpu_cores() * table.cpu_core_hour
            + resources.memory_gib() * table.memory_gib_hour
            + resources.gpu_count() as f64 * gpu_rate;
        let cost = replicas.max(0) as f64 * per_replica;

        if cost > max_usd_per_hour {
            return Some(violation(
                policy,
                rule,
                decision,
                index,
                format!(
                    "estimated cost {:.2} USD/hour exceeds ceiling {:.2} USD/hour",
                    cost, max_usd_per_hour
                ),
            ));
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_quota(
        &self,
        decision: &Decision,
        index: usize,
        rule: &PolicyRule,
        policy: &Policy,
        ctx: &DecisionContext,
        max_replicas: Option<i32>,
        max_cpu_cores: Option<f64>,
        max_memory_bytes: Option<u64>,
        max_gpu_count: Option<u32>,
    ) -> Option<PolicyViolation> {
        let aggregate = self.post_state_aggregate(decision, ctx).await?;

        if let Some(max) = max_replicas {
            if aggregate.replicas > max {
                return Some(violation(
                    policy,
                    rule,
                    decision,
                    index,
                    format!("replica quota exceeded: {} > {}", aggregate.replicas, max),
                ));
            }
        }
        if let Some(max) = max_cpu_cores {
            if aggregate.cpu_cores > max {
                return Some(violation(
                    policy,
                    rule,
                    decision,
                    index,
                    format!(
                        "cpu quota exceeded: {:.1} cores > {:.1} cores",
                        aggregate.cpu_cores, max
                    ),
                ));
            }
        }
        if let Some(max) = max_memory_bytes {
            if aggregate.memory_bytes > max {
                return Some(violation(
                    policy,
                    rule,
                    decision,
                    index,
                    format!(
                        "memory quota exceeded: {} bytes > {} bytes",
                        aggregate.memory_bytes, max
                    ),
                ));
            }
        }
        if let Some(max) = max_gpu_count {
            if aggregate.gpus > max {
                return Some(violation(
                    policy,
                    rule,
                    decision,
                    index,
                    format!("gpu quota exceeded: {} > {}", aggregate.gpus, max),
                ));
            }
        }
        None
    }

    /// Post-state aggregate over the decision's namespace: every other
    /// active deployment at its current size plus this decision's target
    /// at its post-state size.
    async fn post_state_aggregate(
        &self,
        decision: &Decision,
        ctx: &DecisionContext,
    ) -> Option<Aggregate> {
        let replicas = ctx.post_replicas(decision)?;
        let resources = ctx.post_resources(decision)?;
        let mut aggregate = Aggregate::of(replicas, &resources);

        let others = self.deployments.list_active().await.unwrap_or_default();
        for other in others {
            if other.namespace != decision.target.namespace {
                continue;
            }
            if Some(other.workload_id) == decision.target.workload_id {
                continue;
            }
            if let Ok(Some(workload)) = self.workloads.get(other.workload_id).await {
                aggregate.add(other.replicas, &workload.resources);
            }
        }
        Some(aggregate)
    }

    fn check_sla(
        &self,
        decision: &Decision,
        index: usize,
        rule: &PolicyRule,
        policy: &Policy,
        observations: &Observations,
        min_uptime: f64,
    ) -> Option<PolicyViolation> {
        if !decision.verb().is_disruptive() {
            return None;
        }
        let uptime = observations.uptime_7d?;
        if uptime < min_uptime {
            return Some(violation(
                policy,
                rule,
                decision,
                index,
                format!(
                    "sla at risk: observed 7d uptime {:.4} below minimum {:.4}",
                    uptime, min_uptime
                ),
            ));
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn check_slo(
        &self,
        decision: &Decision,
        index: usize,
        rule: &PolicyRule,
        policy: &Policy,
        ctx: &DecisionContext,
        observations: &Observations,
        max_latency_ms_p95: Option<f64>,
        min_success_rate: Option<f64>,
    ) -> Option<PolicyViolation> {
        if !ctx.is_scale_down(decision) {
            return None;
        }
        if let (Some(max), Some(current)) = (max_latency_ms_p95, observations.latency_p95_ms) {
            if current > max {
                return Some(violation(
                    policy,
                    rule,
                    decision,
                    index,
                    format!("latency slo violated: p95 {:.0}ms > {:.0}ms", current, max),
                ));
            }
        }
        if let (Some(min), Some(current)) = (min_success_rate, observations.success_rate) {
            if current < min {
                return Some(violation(
                    policy,
                    rule,
                    decision,
                    index,
                    format!(
                        "success rate slo violated: {:.4} < {:.4}",
                        current, min
                    ),
                ));
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn check_rate_limit(
        &self,
        decision: &Decision,
        index: usize,
        rule: &PolicyRule,
        policy: &Policy,
        max_actions: u32,
        interval_seconds: u64,
        scope: RateScope,
    ) -> Option<PolicyViolation> {
        let scope_name = match scope {
            RateScope::Global => "global".to_string(),
            RateScope::Cluster => format!(
                "cluster:{}",
                decision
                    .target
                    .cluster_id
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "default".to_string())
            ),
            RateScope::Namespace => format!("namespace:{}", decision.target.namespace),
            RateScope::Workload => match decision.target.workload_id {
                Some(id) => format!("workload:{}", id),
                None => {
                    debug!("rate limit with workload scope but no workload target, skipping");
                    return None;
                }
            },
        };
        let key = format!("{}:{}", scope_name, policy.id);

        let allowed =
            self.rate_limiter
                .allow(&key, max_actions, Duration::from_secs(interval_seconds));
        if !allowed {
            return Some(violation(
                policy,
                rule,
                decision,
                index,
                format!(
                    "rate limit exceeded: more than {} actions per {}s for {}",
                    max_actions, interval_seconds, scope_name
                ),
            ));
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn check_change_freeze(
        &self,
        plan: &ActionPlan,
        decision: &Decision,
        index: usize,
        rule: &PolicyRule,
        policy: &Policy,
        windows: &[artzain_server_domain::policies::FreezeWindow],
        recurring: &Option<artzain_server_domain::policies::RecurringFreeze>,
        exempt_sources: &[artzain_server_domain::plans::PlanSource],
    ) -> Option<PolicyViolation> {
        if exempt_sources.contains(&plan.source) {
            return None;
        }
        let now = Utc::now();

        for window in windows {
            if window.is_active(now) {
                let reason = window
                    .reason
                    .clone()
                    .unwrap_or_else(|| "change freeze window".to_string());
                return Some(violation(
                    policy,
                    rule,
                    decision,
                    index,
                    format!(
                        "change freeze active: {} ({} - {})",
                        reason, window.start, window.end
                    ),
                ));
            }
        }

        if let Some(recurring) = recurring {
            if recurring.is_active(now) {
                return Some(violation(
                    policy,
                    rule,
                    decision,
                    index,
                    format!("recurring change freeze active in {}", recurring.tz),
                ));
            }
        }
        None
    }
}

fn violation(
    policy: &Policy,
    rule: &PolicyRule,
    decision: &Decision,
    index: usize,
    message: String,
) -> PolicyViolation {
    PolicyViolation {
        policy_id: policy.id,
        policy_name: policy.name.clone(),
        rule_type: rule.rule_type(),
        action: rule.action,
        message,
        decision_verb: decision.verb(),
        decision_index: index,
    }
}

/// Resolved entities for one decision, fetched once per decision.
struct DecisionContext {
    workload: Option<Workload>,
    deployment: Option<Deployment>,
}

impl DecisionContext {
    /// Replica count after the decision applies. Falls back to the
    /// current deployment size for verbs that do not change capacity.
    fn post_replicas(&self, decision: &Decision) -> Option<i32> {
        decision
            .target_replicas()
            .or_else(|| self.deployment.as_ref().map(|d| d.replicas))
    }

    /// Per-replica resources after the decision applies.
    fn post_resources(&self, decision: &Decision) -> Option<ResourceRequest> {
        if let DecisionParams::Update(update) = &decision.params {
            if let Some(resources) = &update.resources {
                return Some(resources.clone());
            }
        }
        self.workload.as_ref().map(|w| w.resources.clone())
    }

    /// Whether the decision reduces capacity.
    fn is_scale_down(&self, decision: &Decision) -> bool {
        match (decision.target_replicas(), self.deployment.as_ref()) {
            (Some(target), Some(deployment)) => target < deployment.replicas,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct Aggregate {
    replicas: i32,
    cpu_cores: f64,
    memory_bytes: u64,
    gpus: u32,
}

impl Aggregate {
    fn of(replicas: i32, resources: &ResourceRequest) -> Self {
        let mut aggregate = Self::default();
        aggregate.add(replicas, resources);
        aggregate
    }

    fn add(&mut self, replicas: i32, resources: &ResourceRequest) {
        let replicas = replicas.max(0);
        self.replicas += replicas;
        self.cpu_cores += replicas as f64 * resources.cpu_cores();
        self.memory_bytes += replicas as u64 * resources.memory_bytes;
        self.gpus += replicas as u32 * resources.gpu_count();
    }
}
