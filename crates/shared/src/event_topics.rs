//! Centralized event topic constants for NATS JetStream
//!
//! Single source of truth for all event subject names, preventing
//! mismatches between publishers and consumers.
//!
//! ## Naming Convention
//! - Format: `artzain.events.{entity}.{action}`
//! - entity: the domain entity (plans, decisions, canaries, deployments, policies)
//! - action: the event type in lowercase (submitted, approved, stepromoted, ...)

/// Subject prefix for all Artzain events
pub const EVENT_PREFIX: &str = "artzain.events";

/// Stream name for all events
pub const EVENTS_STREAM_NAME: &str = "ARTZAIN_EVENTS";

/// Action-plan event topics
pub mod plan_topics {

    /// PlanSubmitted event subject
    pub const SUBMITTED: &str = "artzain.events.plans.submitted";
    /// PlanApproved event subject
    pub const APPROVED: &str = "artzain.events.plans.approved";
    /// PlanRejected event subject
    pub const REJECTED: &str = "artzain.events.plans.rejected";
    /// PlanShadowExecuted event subject
    pub const SHADOW_EXECUTED: &str = "artzain.events.plans.shadowexecuted";
    /// PlanCompleted event subject
    pub const COMPLETED: &str = "artzain.events.plans.completed";
    /// PlanFailed event subject
    pub const FAILED: &str = "artzain.events.plans.failed";
    /// PlanCancelled event subject
    pub const CANCELLED: &str = "artzain.events.plans.cancelled";

    /// Wildcard for all plan events
    pub const ALL: &str = "artzain.events.plans.>";
}

/// Decision event topics
pub mod decision_topics {

    /// DecisionStarted event subject
    pub const STARTED: &str = "artzain.events.decisions.started";
    /// DecisionCompleted event subject
    pub const COMPLETED: &str = "artzain.events.decisions.completed";
    /// DecisionFailed event subject
    pub const FAILED: &str = "artzain.events.decisions.failed";
    /// DecisionSkipped event subject
    pub const SKIPPED: &str = "artzain.events.decisions.skipped";

    /// Wildcard for all decision events
    pub const ALL: &str = "artzain.events.decisions.>";
}

/// Canary rollout event topics
pub mod canary_topics {

    /// CanaryStarted event subject
    pub const STARTED: &str = "artzain.events.canaries.started";
    /// CanaryStepPromoted event subject
    pub const STEP_PROMOTED: &str = "artzain.events.canaries.steppromoted";
    /// CanaryHealthSampled event subject
    pub const HEALTH_SAMPLED: &str = "artzain.events.canaries.healthsampled";
    /// CanaryPromoted event subject
    pub const PROMOTED: &str = "artzain.events.canaries.promoted";
    /// CanaryFailed event subject
    pub const FAILED: &str = "artzain.events.canaries.failed";

    /// Wildcard for all canary events
    pub const ALL: &str = "artzain.events.canaries.>";
}

/// Deployment event topics
pub mod deployment_topics {

    /// DeploymentCreated event subject
    pub const CREATED: &str = "artzain.events.deployments.created";
    /// DeploymentScaled event subject
    pub const SCALED: &str = "artzain.events.deployments.scaled";
    /// DeploymentUpdated event subject
    pub const UPDATED: &str = "artzain.events.deployments.updated";
    /// DeploymentDeleted event subject
    pub const DELETED: &str = "artzain.events.deployments.deleted";
    /// DeploymentRollbackTriggered event subject
    pub const ROLLBACK_TRIGGERED: &str = "artzain.events.deployments.rollbacktriggered";
    /// DeploymentRolledBack event subject
    pub const ROLLED_BACK: &str = "artzain.events.deployments.rolledback";

    /// Wildcard for all deployment events
    pub const ALL: &str = "artzain.events.deployments.>";
}

/// Policy event topics
pub mod policy_topics {

    /// PolicyViolation event subject
    pub const VIOLATION: &str = "artzain.events.policies.violation";

    /// Wildcard for all policy events
    pub const ALL: &str = "artzain.events.policies.>";
}

/// Wildcard for all Artzain events (multi-level)
pub const ALL_EVENTS: &str = "artzain.events.>";

/// Helper function to build an event subject from entity and action
#[inline]
pub fn event_subject(entity: &str, action: &str) -> String {
    format!("{}.{}.{}", EVENT_PREFIX, entity, action)
}
