use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle states of a deployment.
///
/// Mutations come from exactly one writer at a time (plan executor, canary
/// controller or rollback controller); the transition table below is the
/// contract they all share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Scaling,
    Failed,
    RollingBack,
    RolledBack,
    Completed,
}

impl DeploymentStatus {
    /// Validates a state transition against the deployment state machine.
    ///
    /// Valid transitions:
    /// - Pending → Running, Failed
    /// - Running → Scaling, RollingBack, Failed, Completed
    /// - Scaling → Running, Failed, RollingBack
    /// - RollingBack → RolledBack, Failed
    /// - Failed → RollingBack (an operator may still revert a failed rollout)
    /// - RolledBack, Completed → (terminal)
    pub fn can_transition_to(&self, new_status: &DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, new_status) {
            (s, n) if s == n => false,

            (Pending, Running) => true,
            (Pending, Failed) => true,

            (Running, Scaling) => true,
            (Running, RollingBack) => true,
            (Running, Failed) => true,
            (Running, Completed) => true,

            (Scaling, Running) => true,
            (Scaling, Failed) => true,
            (Scaling, RollingBack) => true,

            (RollingBack, RolledBack) => true,
            (RollingBack, Failed) => true,

            (Failed, RollingBack) => true,

            _ => false,
        }
    }

    /// Returns true when no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::RolledBack | DeploymentStatus::Completed)
    }

    /// Returns true while the deployment is serving or converging.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Running | DeploymentStatus::Scaling | DeploymentStatus::Pending
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Scaling => "scaling",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RollingBack => "rolling_back",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "running" => Ok(DeploymentStatus::Running),
            "scaling" => Ok(DeploymentStatus::Scaling),
            "failed" => Ok(DeploymentStatus::Failed),
            "rolling_back" => Ok(DeploymentStatus::RollingBack),
            "rolled_back" => Ok(DeploymentStatus::RolledBack),
            "completed" => Ok(DeploymentStatus::Completed),
            other => Err(format!("unknown deployment status: {}", other)),
        }
    }
}

/// Lifecycle states of an action plan.
///
/// A plan is processed at most once to success: `Rejected` and the terminal
/// states are sinks, and a plan that reaches `Completed` keeps its stored
/// result forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    /// Valid transitions:
    /// - Pending → Approved, Rejected, Cancelled
    /// - Approved → Executing, Cancelled
    /// - Executing → Completed, Failed, Cancelled
    /// - Rejected, Completed, Failed, Cancelled → (sinks)
    pub fn can_transition_to(&self, new_status: &PlanStatus) -> bool {
        use PlanStatus::*;
        match (self, new_status) {
            (s, n) if s == n => false,

            (Pending, Approved) => true,
            (Pending, Rejected) => true,
            (Pending, Cancelled) => true,

            (Approved, Executing) => true,
            (Approved, Cancelled) => true,

            (Executing, Completed) => true,
            (Executing, Failed) => true,
            (Executing, Cancelled) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Rejected | PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Approved => "approved",
            PlanStatus::Rejected => "rejected",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PlanStatus::Pending),
            "approved" => Ok(PlanStatus::Approved),
            "rejected" => Ok(PlanStatus::Rejected),
            "executing" => Ok(PlanStatus::Executing),
            "completed" => Ok(PlanStatus::Completed),
            "failed" => Ok(PlanStatus::Failed),
            "cancelled" => Ok(PlanStatus::Cancelled),
            other => Err(format!("unknown plan status: {}", other)),
        }
    }
}

/// Phases of a canary rollout.
///
/// Created at `Initializing`, terminal at `Promoted` or `Failed`. The
/// controller guarantees a terminal phase within the configured maximum
/// duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryPhase {
    Initializing,
    DeployingCanary,
    Analyzing,
    Promoting,
    Promoted,
    Failed,
}

impl CanaryPhase {
    /// Valid transitions:
    /// - Initializing → DeployingCanary, Failed
    /// - DeployingCanary → Analyzing, Failed
    /// - Analyzing → DeployingCanary, Promoting, Failed
    /// - Promoting → Promoted, Failed
    /// - Promoted, Failed → (terminal)
    pub fn can_transition_to(&self, new_phase: &CanaryPhase) -> bool {
        use CanaryPhase::*;
        match (self, new_phase) {
            (s, n) if s == n => false,

            (Initializing, DeployingCanary) => true,
            (Initializing, Failed) => true,

            (DeployingCanary, Analyzing) => true,
            (DeployingCanary, Failed) => true,

            (Analyzing, DeployingCanary) => true,
            (Analyzing, Promoting) => true,
            (Analyzing, Failed) => true,

            (Promoting, Promoted) => true,
            (Promoting, Failed) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CanaryPhase::Promoted | CanaryPhase::Failed)
    }
}

impl fmt::Display for CanaryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CanaryPhase::Initializing => "initializing",
            CanaryPhase::DeployingCanary => "deploying_canary",
            CanaryPhase::Analyzing => "analyzing",
            CanaryPhase::Promoting => "promoting",
            CanaryPhase::Promoted => "promoted",
            CanaryPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}
