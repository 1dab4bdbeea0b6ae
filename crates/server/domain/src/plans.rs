//! Action plans and decisions.
//!
//! A plan is an ordered sequence of decisions with a source tag and a
//! correlation id. Decision parameters are a tagged variant per verb:
//! unknown verbs fail at deserialization, not at runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::policies::EvaluationMode;
use crate::shared_kernel::{
    ClusterId, CorrelationId, DomainError, PlanId, PlanStatus, Result, WorkloadId,
};
use crate::workloads::ResourceRequest;

/// External actor that produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    /// The external telemetry/planning bridge
    Bridge,
    /// The request/response API
    Api,
    /// A human operator
    Operator,
}

impl std::fmt::Display for PlanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanSource::Bridge => "bridge",
            PlanSource::Api => "api",
            PlanSource::Operator => "operator",
        };
        write!(f, "{}", s)
    }
}

/// Decision verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionVerb {
    Scale,
    Reschedule,
    Rollback,
    Update,
    Drain,
    Restart,
}

impl DecisionVerb {
    /// Disruptive verbs interact with SLA rules.
    pub fn is_disruptive(&self) -> bool {
        matches!(
            self,
            DecisionVerb::Rollback | DecisionVerb::Drain | DecisionVerb::Restart
        )
    }
}

impl std::fmt::Display for DecisionVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionVerb::Scale => "scale",
            DecisionVerb::Reschedule => "reschedule",
            DecisionVerb::Rollback => "rollback",
            DecisionVerb::Update => "update",
            DecisionVerb::Drain => "drain",
            DecisionVerb::Restart => "restart",
        };
        write!(f, "{}", s)
    }
}

/// What a decision acts on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionTarget {
    pub workload_id: Option<WorkloadId>,
    pub cluster_id: Option<ClusterId>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl DecisionTarget {
    pub fn workload(workload_id: WorkloadId, namespace: impl Into<String>) -> Self {
        Self {
            workload_id: Some(workload_id),
            cluster_id: None,
            namespace: namespace.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Stable key used to serialize plans acting on the same target.
    pub fn serialization_key(&self) -> String {
        let mut parts: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if let Some(w) = &self.workload_id {
            parts.push(format!("workload={}", w));
        }
        parts.push(format!("namespace={}", self.namespace));
        parts.join(",")
    }
}

/// Typed parameters, one variant per verb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verb", content = "params", rename_all = "snake_case")]
pub enum DecisionParams {
    Scale(ScaleParams),
    Reschedule(RescheduleParams),
    Rollback(RollbackParams),
    Update(UpdateParams),
    Drain(DrainParams),
    Restart(RestartParams),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub replicas: i32,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RescheduleParams {
    /// Preferred node, advisory
    pub node: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackParams {
    /// Target revision; previous managed revision when absent
    pub revision: Option<i64>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateParams {
    pub image: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub resources: Option<ResourceRequest>,
    pub replicas: Option<i32>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainParams {
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartParams {
    pub timeout_seconds: Option<u64>,
}

impl DecisionParams {
    pub fn verb(&self) -> DecisionVerb {
        match self {
            DecisionParams::Scale(_) => DecisionVerb::Scale,
            DecisionParams::Reschedule(_) => DecisionVerb::Reschedule,
            DecisionParams::Rollback(_) => DecisionVerb::Rollback,
            DecisionParams::Update(_) => DecisionVerb::Update,
            DecisionParams::Drain(_) => DecisionVerb::Drain,
            DecisionParams::Restart(_) => DecisionVerb::Restart,
        }
    }

    /// Per-decision timeout override, when present.
    pub fn timeout_seconds(&self) -> Option<u64> {
        match self {
            DecisionParams::Scale(p) => p.timeout_seconds,
            DecisionParams::Reschedule(p) => p.timeout_seconds,
            DecisionParams::Rollback(p) => p.timeout_seconds,
            DecisionParams::Update(p) => p.timeout_seconds,
            DecisionParams::Drain(p) => p.timeout_seconds,
            DecisionParams::Restart(p) => p.timeout_seconds,
        }
    }
}

/// Safety constraints of a single decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyEnvelope {
    /// Maximum fraction of the target fleet this decision may affect
    pub max_blast_radius_percent: Option<u8>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    900
}

impl Default for SafetyEnvelope {
    fn default() -> Self {
        Self {
            max_blast_radius_percent: None,
            requires_approval: false,
            ttl_seconds: default_ttl(),
        }
    }
}

/// A single imperative act against a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(flatten)]
    pub params: DecisionParams,
    pub target: DecisionTarget,
    #[serde(default)]
    pub safety: SafetyEnvelope,
}

impl Decision {
    pub fn new(params: DecisionParams, target: DecisionTarget) -> Self {
        Self {
            params,
            target,
            safety: SafetyEnvelope::default(),
        }
    }

    pub fn verb(&self) -> DecisionVerb {
        self.params.verb()
    }

    /// Post-state replica count implied by this decision, when it names one.
    pub fn target_replicas(&self) -> Option<i32> {
        match &self.params {
            DecisionParams::Scale(p) => Some(p.replicas),
            DecisionParams::Update(p) => p.replicas,
            _ => None,
        }
    }
}

/// Terminal status of one executed decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Succeeded,
    Failed,
    Skipped,
    AwaitingApproval,
}

/// Outcome of one decision within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub index: usize,
    pub verb: DecisionVerb,
    pub status: DecisionStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// An ordered sequence of decisions, processed at most once to success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub id: PlanId,
    pub decisions: Vec<Decision>,
    pub source: PlanSource,
    pub correlation_id: Option<CorrelationId>,
    pub status: PlanStatus,
    /// Evaluation mode override; the configured default applies when absent
    pub mode: Option<EvaluationMode>,
    #[serde(default)]
    pub abort_on_first_failure: bool,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl ActionPlan {
    pub fn new(decisions: Vec<Decision>, source: PlanSource) -> Result<Self> {
        if decisions.is_empty() {
            return Err(DomainError::InvalidInput {
                field: "plan.decisions".to_string(),
                reason: "a plan must contain at least one decision".to_string(),
            });
        }
        Ok(Self {
            id: PlanId::new(),
            decisions,
            source,
            correlation_id: None,
            status: PlanStatus::Pending,
            mode: None,
            abort_on_first_failure: false,
            created_at: Utc::now(),
            executed_at: None,
        })
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Advance the status, enforcing monotonic progress.
    pub fn transition(&mut self, new_status: PlanStatus) -> Result<()> {
        if !self.status.can_transition_to(&new_status) {
            return Err(DomainError::InvalidStateTransition {
                entity: "plan",
                from: self.status.to_string(),
                to: new_status.to_string(),
            });
        }
        self.status = new_status;
        if matches!(new_status, PlanStatus::Completed | PlanStatus::Failed) {
            self.executed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Union of the serialization keys of all decision targets.
    pub fn target_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .decisions
            .iter()
            .map(|d| d.target.serialization_key())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// The stored, externally visible result of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub approved: bool,
    pub violations: Vec<crate::policies::PolicyViolation>,
    pub decisions: Vec<DecisionOutcome>,
    /// True when the plan ran in shadow mode and nothing was dispatched
    pub shadow: bool,
    pub mode: EvaluationMode,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale_decision(replicas: i32) -> Decision {
        Decision::new(
            DecisionParams::Scale(ScaleParams {
                replicas,
                timeout_seconds: None,
            }),
            DecisionTarget::workload(WorkloadId::new(), "ml-serving"),
        )
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(ActionPlan::new(vec![], PlanSource::Api).is_err());
    }

    #[test]
    fn test_plan_transition_guard() {
        let mut plan = ActionPlan::new(vec![scale_decision(3)], PlanSource::Api).unwrap();
        plan.transition(PlanStatus::Approved).unwrap();
        plan.transition(PlanStatus::Executing).unwrap();
        assert!(plan.transition(PlanStatus::Pending).is_err());
        plan.transition(PlanStatus::Completed).unwrap();
        assert!(plan.executed_at.is_some());
        assert!(plan.transition(PlanStatus::Executing).is_err());
    }

    #[test]
    fn test_decision_serde_verb_tagging() {
        let decision = scale_decision(10);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["verb"], "scale");
        assert_eq!(json["params"]["replicas"], 10);

        let back: Decision = serde_json::from_value(json).unwrap();
        assert_eq!(back.verb(), DecisionVerb::Scale);
    }

    #[test]
    fn test_unknown_verb_fails_deserialization() {
        let json = serde_json::json!({
            "verb": "explode",
            "params": {},
            "target": { "namespace": "default" }
        });
        assert!(serde_json::from_value::<Decision>(json).is_err());
    }

    #[test]
    fn test_disruptive_verbs() {
        assert!(DecisionVerb::Rollback.is_disruptive());
        assert!(DecisionVerb::Drain.is_disruptive());
        assert!(DecisionVerb::Restart.is_disruptive());
        assert!(!DecisionVerb::Scale.is_disruptive());
        assert!(!DecisionVerb::Update.is_disruptive());
    }

    #[test]
    fn test_target_keys_dedup() {
        let workload = WorkloadId::new();
        let d1 = Decision::new(
            DecisionParams::Scale(ScaleParams {
                replicas: 2,
                timeout_seconds: None,
            }),
            DecisionTarget::workload(workload, "ns"),
        );
        let d2 = Decision::new(
            DecisionParams::Restart(RestartParams::default()),
            DecisionTarget::workload(workload, "ns"),
        );
        let plan = ActionPlan::new(vec![d1, d2], PlanSource::Bridge).unwrap();
        assert_eq!(plan.target_keys().len(), 1);
    }

    #[test]
    fn test_safety_defaults() {
        let safety = SafetyEnvelope::default();
        assert_eq!(safety.ttl_seconds, 900);
        assert!(!safety.requires_approval);
        assert!(safety.max_blast_radius_percent.is_none());
    }
}
