//! Domain events.
//!
//! Events are immutable facts. Every event carries the mandatory
//! metadata block: occurrence time, emitting worker, per-worker sequence
//! and an optional correlation id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use artzain_shared::event_topics::{
    canary_topics, decision_topics, deployment_topics, plan_topics, policy_topics,
};

use crate::health::HealthStatus;
use crate::plans::{DecisionOutcome, DecisionVerb, PlanSource};
use crate::policies::{EvaluationMode, PolicyViolation};
use crate::rollback::{RollbackReason, RollbackRecord};
use crate::shared_kernel::{CanaryId, CorrelationId, DeploymentId, PlanId};

/// Mandatory metadata carried by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub occurred_at: DateTime<Utc>,
    /// Identity of the emitting worker
    pub worker_id: String,
    /// Monotonic per-worker sequence number
    pub sequence: u64,
    pub correlation_id: Option<CorrelationId>,
}

impl EventMetadata {
    pub fn new(
        worker_id: impl Into<String>,
        sequence: u64,
        correlation_id: Option<CorrelationId>,
    ) -> Self {
        Self {
            occurred_at: Utc::now(),
            worker_id: worker_id.into(),
            sequence,
            correlation_id,
        }
    }
}

/// A domain event that has occurred in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DomainEvent {
    PlanSubmitted {
        plan_id: PlanId,
        source: PlanSource,
        decision_count: usize,
        meta: EventMetadata,
    },
    PlanApproved {
        plan_id: PlanId,
        mode: EvaluationMode,
        violation_count: usize,
        meta: EventMetadata,
    },
    PlanRejected {
        plan_id: PlanId,
        violations: Vec<PolicyViolation>,
        meta: EventMetadata,
    },
    PlanShadowExecuted {
        plan_id: PlanId,
        /// Human-readable summaries of the actions that would have run
        would_execute: Vec<String>,
        violation_count: usize,
        meta: EventMetadata,
    },
    PlanCompleted {
        plan_id: PlanId,
        outcomes: Vec<DecisionOutcome>,
        meta: EventMetadata,
    },
    PlanFailed {
        plan_id: PlanId,
        outcomes: Vec<DecisionOutcome>,
        message: String,
        meta: EventMetadata,
    },
    PlanCancelled {
        plan_id: PlanId,
        meta: EventMetadata,
    },

    DecisionStarted {
        plan_id: PlanId,
        index: usize,
        verb: DecisionVerb,
        meta: EventMetadata,
    },
    DecisionCompleted {
        plan_id: PlanId,
        index: usize,
        verb: DecisionVerb,
        duration_ms: u64,
        meta: EventMetadata,
    },
    DecisionFailed {
        plan_id: PlanId,
        index: usize,
        verb: DecisionVerb,
        message: String,
        meta: EventMetadata,
    },
    DecisionSkipped {
        plan_id: PlanId,
        index: usize,
        verb: DecisionVerb,
        reason: String,
        meta: EventMetadata,
    },

    CanaryStarted {
        canary_id: CanaryId,
        deployment_id: DeploymentId,
        initial_percent: u8,
        meta: EventMetadata,
    },
    CanaryStepPromoted {
        canary_id: CanaryId,
        step: u32,
        percent: u8,
        score: f64,
        meta: EventMetadata,
    },
    CanaryHealthSampled {
        canary_id: CanaryId,
        score: f64,
        status: HealthStatus,
        meta: EventMetadata,
    },
    CanaryPromoted {
        canary_id: CanaryId,
        deployment_id: DeploymentId,
        meta: EventMetadata,
    },
    CanaryFailed {
        canary_id: CanaryId,
        deployment_id: DeploymentId,
        last_score: Option<f64>,
        cause: String,
        meta: EventMetadata,
    },

    DeploymentCreated {
        deployment_id: DeploymentId,
        meta: EventMetadata,
    },
    DeploymentScaled {
        deployment_id: DeploymentId,
        replicas: i32,
        meta: EventMetadata,
    },
    DeploymentUpdated {
        deployment_id: DeploymentId,
        meta: EventMetadata,
    },
    DeploymentDeleted {
        deployment_id: DeploymentId,
        meta: EventMetadata,
    },
    DeploymentRollbackTriggered {
        deployment_id: DeploymentId,
        reason: RollbackReason,
        score: Option<f64>,
        meta: EventMetadata,
    },
    DeploymentRolledBack {
        deployment_id: DeploymentId,
        record: RollbackRecord,
        meta: EventMetadata,
    },

    PolicyViolationRaised {
        plan_id: PlanId,
        violation: PolicyViolation,
        meta: EventMetadata,
    },
}

impl DomainEvent {
    /// The wire event type, dot-separated entity and action.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::PlanSubmitted { .. } => "plan.submitted",
            DomainEvent::PlanApproved { .. } => "plan.approved",
            DomainEvent::PlanRejected { .. } => "plan.rejected",
            DomainEvent::PlanShadowExecuted { .. } => "plan.shadow_executed",
            DomainEvent::PlanCompleted { .. } => "plan.completed",
            DomainEvent::PlanFailed { .. } => "plan.failed",
            DomainEvent::PlanCancelled { .. } => "plan.cancelled",
            DomainEvent::DecisionStarted { .. } => "decision.started",
            DomainEvent::DecisionCompleted { .. } => "decision.completed",
            DomainEvent::DecisionFailed { .. } => "decision.failed",
            DomainEvent::DecisionSkipped { .. } => "decision.skipped",
            DomainEvent::CanaryStarted { .. } => "canary.started",
            DomainEvent::CanaryStepPromoted { .. } => "canary.step_promoted",
            DomainEvent::CanaryHealthSampled { .. } => "canary.health_sampled",
            DomainEvent::CanaryPromoted { .. } => "canary.promoted",
            DomainEvent::CanaryFailed { .. } => "canary.failed",
            DomainEvent::DeploymentCreated { .. } => "deployment.created",
            DomainEvent::DeploymentScaled { .. } => "deployment.scaled",
            DomainEvent::DeploymentUpdated { .. } => "deployment.updated",
            DomainEvent::DeploymentDeleted { .. } => "deployment.deleted",
            DomainEvent::DeploymentRollbackTriggered { .. } => "deployment.rollback_triggered",
            DomainEvent::DeploymentRolledBack { .. } => "deployment.rolled_back",
            DomainEvent::PolicyViolationRaised { .. } => "policy.violation",
        }
    }

    /// The NATS subject this event publishes to.
    pub fn subject(&self) -> &'static str {
        match self {
            DomainEvent::PlanSubmitted { .. } => plan_topics::SUBMITTED,
            DomainEvent::PlanApproved { .. } => plan_topics::APPROVED,
            DomainEvent::PlanRejected { .. } => plan_topics::REJECTED,
            DomainEvent::PlanShadowExecuted { .. } => plan_topics::SHADOW_EXECUTED,
            DomainEvent::PlanCompleted { .. } => plan_topics::COMPLETED,
            DomainEvent::PlanFailed { .. } => plan_topics::FAILED,
            DomainEvent::PlanCancelled { .. } => plan_topics::CANCELLED,
            DomainEvent::DecisionStarted { .. } => decision_topics::STARTED,
            DomainEvent::DecisionCompleted { .. } => decision_topics::COMPLETED,
            DomainEvent::DecisionFailed { .. } => decision_topics::FAILED,
            DomainEvent::DecisionSkipped { .. } => decision_topics::SKIPPED,
            DomainEvent::CanaryStarted { .. } => canary_topics::STARTED,
            DomainEvent::CanaryStepPromoted { .. } => canary_topics::STEP_PROMOTED,
            DomainEvent::CanaryHealthSampled { .. } => canary_topics::HEALTH_SAMPLED,
            DomainEvent::CanaryPromoted { .. } => canary_topics::PROMOTED,
            DomainEvent::CanaryFailed { .. } => canary_topics::FAILED,
            DomainEvent::DeploymentCreated { .. } => deployment_topics::CREATED,
            DomainEvent::DeploymentScaled { .. } => deployment_topics::SCALED,
            DomainEvent::DeploymentUpdated { .. } => deployment_topics::UPDATED,
            DomainEvent::DeploymentDeleted { .. } => deployment_topics::DELETED,
            DomainEvent::DeploymentRollbackTriggered { .. } => {
                deployment_topics::ROLLBACK_TRIGGERED
            }
            DomainEvent::DeploymentRolledBack { .. } => deployment_topics::ROLLED_BACK,
            DomainEvent::PolicyViolationRaised { .. } => policy_topics::VIOLATION,
        }
    }

    pub fn metadata(&self) -> &EventMetadata {
        match self {
            DomainEvent::PlanSubmitted { meta, .. }
            | DomainEvent::PlanApproved { meta, .. }
            | DomainEvent::PlanRejected { meta, .. }
            | DomainEvent::PlanShadowExecuted { meta, .. }
            | DomainEvent::PlanCompleted { meta, .. }
            | DomainEvent::PlanFailed { meta, .. }
            | DomainEvent::PlanCancelled { meta, .. }
            | DomainEvent::DecisionStarted { meta, .. }
            | DomainEvent::DecisionCompleted { meta, .. }
            | DomainEvent::DecisionFailed { meta, .. }
            | DomainEvent::DecisionSkipped { meta, .. }
            | DomainEvent::CanaryStarted { meta, .. }
            | DomainEvent::CanaryStepPromoted { meta, .. }
            | DomainEvent::CanaryHealthSampled { meta, .. }
            | DomainEvent::CanaryPromoted { meta, .. }
            | DomainEvent::CanaryFailed { meta, .. }
            | DomainEvent::DeploymentCreated { meta, .. }
            | DomainEvent::DeploymentScaled { meta, .. }
            | DomainEvent::DeploymentUpdated { meta, .. }
            | DomainEvent::DeploymentDeleted { meta, .. }
            | DomainEvent::DeploymentRollbackTriggered { meta, .. }
            | DomainEvent::DeploymentRolledBack { meta, .. }
            | DomainEvent::PolicyViolationRaised { meta, .. } => meta,
        }
    }
}
