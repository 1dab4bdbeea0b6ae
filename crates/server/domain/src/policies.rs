//! Policies: prioritized, selector-matched rule bundles evaluated against
//! action plans.
//!
//! Rules are a tagged variant per type with a typed constraint payload.
//! Evaluation itself lives in the application layer; the pure parts
//! (selector matching, ordering, freeze-window arithmetic) live here.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::plans::{DecisionVerb, PlanSource};
use crate::shared_kernel::{DomainError, PolicyId, Result};

/// Policy evaluation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Violations with a reject action deny the plan
    Enforce,
    /// All violations are recorded, the plan is still approved
    DryRun,
    /// Like dry-run, but the result is tagged so nothing is dispatched
    Shadow,
}

impl Default for EvaluationMode {
    fn default() -> Self {
        Self::Enforce
    }
}

impl std::fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvaluationMode::Enforce => "enforce",
            EvaluationMode::DryRun => "dry_run",
            EvaluationMode::Shadow => "shadow",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EvaluationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "enforce" => Ok(EvaluationMode::Enforce),
            "dry_run" => Ok(EvaluationMode::DryRun),
            "shadow" => Ok(EvaluationMode::Shadow),
            other => Err(format!("unknown evaluation mode: {}", other)),
        }
    }
}

/// Action taken when a rule fires.
///
/// Ordered by severity: when rules of equal priority yield conflicting
/// actions on one decision, the highest wins (`Reject > Warn > Log`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Log,
    Warn,
    Reject,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuleAction::Log => "log",
            RuleAction::Warn => "warn",
            RuleAction::Reject => "reject",
        };
        write!(f, "{}", s)
    }
}

/// Rule type discriminant, carried on violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    CostCeiling,
    Quota,
    Sla,
    Slo,
    RateLimit,
    ChangeFreeze,
    /// Synthetic type reported when an observation lookup times out
    EvaluationTimeout,
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuleType::CostCeiling => "cost_ceiling",
            RuleType::Quota => "quota",
            RuleType::Sla => "sla",
            RuleType::Slo => "slo",
            RuleType::RateLimit => "rate_limit",
            RuleType::ChangeFreeze => "change_freeze",
            RuleType::EvaluationTimeout => "evaluation_timeout",
        };
        write!(f, "{}", s)
    }
}

/// Partition under which a rate limit counts events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    Global,
    Cluster,
    Namespace,
    Workload,
}

/// Day of week for recurring freeze windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreezeDay {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl FreezeDay {
    pub fn matches(&self, weekday: Weekday) -> bool {
        matches!(
            (self, weekday),
            (FreezeDay::Mon, Weekday::Mon)
                | (FreezeDay::Tue, Weekday::Tue)
                | (FreezeDay::Wed, Weekday::Wed)
                | (FreezeDay::Thu, Weekday::Thu)
                | (FreezeDay::Fri, Weekday::Fri)
                | (FreezeDay::Sat, Weekday::Sat)
                | (FreezeDay::Sun, Weekday::Sun)
        )
    }
}

/// Absolute change-freeze window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// IANA timezone name, e.g. "UTC" or "Europe/Madrid"
    pub tz: String,
    pub reason: Option<String>,
}

impl FreezeWindow {
    /// Whether `now` falls inside the window.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }
}

/// Recurring change-freeze window (weekly schedule in a timezone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringFreeze {
    pub days_of_week: Vec<FreezeDay>,
    /// Hours of day (0-23) in the policy timezone; empty means all day
    pub hours: Vec<u8>,
    /// IANA timezone name
    pub tz: String,
}

impl RecurringFreeze {
    /// Whether `now`, viewed in the policy's timezone, matches the
    /// recurring schedule. When both days and hours are given the
    /// window is their intersection. Unknown timezones never match
    /// (registration validation rejects them; this guards stored data).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.days_of_week.is_empty() && self.hours.is_empty() {
            return false;
        }
        let tz: Tz = match self.tz.parse() {
            Ok(tz) => tz,
            Err(_) => return false,
        };
        let local = now.with_timezone(&tz);

        if !self.days_of_week.is_empty()
            && !self.days_of_week.iter().any(|d| d.matches(local.weekday()))
        {
            return false;
        }
        if !self.hours.is_empty() && !self.hours.contains(&(local.hour() as u8)) {
            return false;
        }
        true
    }
}

/// Typed constraint payload, one variant per rule type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConstraint {
    CostCeiling {
        max_usd_per_hour: f64,
        /// Optional label of the price source, informational only
        cost_source: Option<String>,
    },
    Quota {
        max_replicas: Option<i32>,
        max_cpu_cores: Option<f64>,
        max_memory_bytes: Option<u64>,
        max_gpu_count: Option<u32>,
    },
    Sla {
        /// Minimum observed 7-day uptime as a fraction
        min_uptime: f64,
    },
    Slo {
        max_latency_ms_p95: Option<f64>,
        min_success_rate: Option<f64>,
    },
    RateLimit {
        max_actions: u32,
        interval_seconds: u64,
        scope: RateScope,
    },
    ChangeFreeze {
        #[serde(default)]
        windows: Vec<FreezeWindow>,
        recurring: Option<RecurringFreeze>,
        #[serde(default)]
        exempt_sources: Vec<PlanSource>,
    },
}

impl RuleConstraint {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleConstraint::CostCeiling { .. } => RuleType::CostCeiling,
            RuleConstraint::Quota { .. } => RuleType::Quota,
            RuleConstraint::Sla { .. } => RuleType::Sla,
            RuleConstraint::Slo { .. } => RuleType::Slo,
            RuleConstraint::RateLimit { .. } => RuleType::RateLimit,
            RuleConstraint::ChangeFreeze { .. } => RuleType::ChangeFreeze,
        }
    }
}

/// One rule of a policy: a constraint plus the action on violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(flatten)]
    pub constraint: RuleConstraint,
    #[serde(default = "default_action")]
    pub action: RuleAction,
}

fn default_action() -> RuleAction {
    RuleAction::Reject
}

impl PolicyRule {
    pub fn new(constraint: RuleConstraint, action: RuleAction) -> Self {
        Self { constraint, action }
    }

    pub fn rule_type(&self) -> RuleType {
        self.constraint.rule_type()
    }
}

/// A named, prioritized, enable-able bundle of rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    pub rules: Vec<PolicyRule>,
    /// Higher priority is evaluated first; ties break by ascending name
    pub priority: i32,
    pub enabled: bool,
    /// Label selector over the decision target; absent matches everything
    pub selector: Option<BTreeMap<String, String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(name: impl Into<String>, rules: Vec<PolicyRule>, priority: i32) -> Result<Self> {
        let name = name.into();
        if name.len() < 3 || name.len() > 255 {
            return Err(DomainError::InvalidInput {
                field: "policy.name".to_string(),
                reason: format!("length must be in 3..=255, got {}", name.len()),
            });
        }
        if !(0..=1000).contains(&priority) {
            return Err(DomainError::InvalidInput {
                field: "policy.priority".to_string(),
                reason: format!("must be in 0..=1000, got {}", priority),
            });
        }
        let policy = Self {
            id: PolicyId::new(),
            name,
            rules,
            priority,
            enabled: true,
            selector: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_selector(mut self, selector: BTreeMap<String, String>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Constraint payloads must be total; timezone names are checked here
    /// so evaluation never has to guess.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            match &rule.constraint {
                RuleConstraint::CostCeiling {
                    max_usd_per_hour, ..
                } => {
                    if *max_usd_per_hour < 0.0 {
                        return Err(invalid_rule("cost_ceiling.max_usd_per_hour"));
                    }
                }
                RuleConstraint::Sla { min_uptime } => {
                    if !(0.0..=1.0).contains(min_uptime) {
                        return Err(invalid_rule("sla.min_uptime"));
                    }
                }
                RuleConstraint::RateLimit {
                    max_actions,
                    interval_seconds,
                    ..
                } => {
                    if *max_actions == 0 || *interval_seconds == 0 {
                        return Err(invalid_rule("rate_limit"));
                    }
                }
                RuleConstraint::ChangeFreeze {
                    windows, recurring, ..
                } => {
                    for window in windows {
                        if window.tz.parse::<Tz>().is_err() {
                            return Err(invalid_rule("change_freeze.tz"));
                        }
                        if window.end < window.start {
                            return Err(invalid_rule("change_freeze.window"));
                        }
                    }
                    if let Some(recurring) = recurring {
                        if recurring.tz.parse::<Tz>().is_err() {
                            return Err(invalid_rule("change_freeze.recurring.tz"));
                        }
                        if recurring.hours.iter().any(|h| *h > 23) {
                            return Err(invalid_rule("change_freeze.recurring.hours"));
                        }
                    }
                }
                RuleConstraint::Quota { .. } | RuleConstraint::Slo { .. } => {}
            }
        }
        Ok(())
    }

    /// Whether this policy applies to a decision with the given target
    /// labels. No selector matches everything; otherwise every selector
    /// entry must be present and equal.
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        match &self.selector {
            None => true,
            Some(selector) => selector
                .iter()
                .all(|(k, v)| labels.get(k).map(|lv| lv == v).unwrap_or(false)),
        }
    }
}

fn invalid_rule(field: &str) -> DomainError {
    DomainError::InvalidInput {
        field: format!("policy.rule.{}", field),
        reason: "invalid constraint".to_string(),
    }
}

/// Order policies for evaluation: strictly decreasing priority, ties by
/// ascending name. Disabled policies are dropped.
pub fn evaluation_order(policies: &[Policy]) -> Vec<&Policy> {
    let mut ordered: Vec<&Policy> = policies.iter().filter(|p| p.enabled).collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));
    ordered
}

/// One fired rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub policy_id: PolicyId,
    pub policy_name: String,
    pub rule_type: RuleType,
    pub action: RuleAction,
    pub message: String,
    pub decision_verb: DecisionVerb,
    pub decision_index: usize,
}

/// Aggregate result of evaluating one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub plan_id: crate::shared_kernel::PlanId,
    pub approved: bool,
    pub violations: Vec<PolicyViolation>,
    pub mode: EvaluationMode,
    pub evaluated_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl EvaluationResult {
    /// Whether any violation carries a reject action.
    pub fn has_rejections(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.action == RuleAction::Reject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quota_rule() -> PolicyRule {
        PolicyRule::new(
            RuleConstraint::Quota {
                max_replicas: Some(100),
                max_cpu_cores: None,
                max_memory_bytes: None,
                max_gpu_count: None,
            },
            RuleAction::Reject,
        )
    }

    #[test]
    fn test_action_severity_ordering() {
        assert!(RuleAction::Reject > RuleAction::Warn);
        assert!(RuleAction::Warn > RuleAction::Log);
    }

    #[test]
    fn test_evaluation_order_priority_then_name() {
        let mut a = Policy::new("zeta", vec![quota_rule()], 100).unwrap();
        let b = Policy::new("alpha", vec![quota_rule()], 100).unwrap();
        let c = Policy::new("low", vec![quota_rule()], 10).unwrap();
        let mut disabled = Policy::new("disabled", vec![quota_rule()], 900).unwrap();
        disabled.enabled = false;
        a.enabled = true;

        let policies = vec![a, b, c, disabled];
        let ordered = evaluation_order(&policies);
        let names: Vec<&str> = ordered.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta", "low"]);
    }

    #[test]
    fn test_selector_matching() {
        let mut selector = BTreeMap::new();
        selector.insert("team".to_string(), "ml".to_string());
        let policy = Policy::new("team-ml", vec![quota_rule()], 50)
            .unwrap()
            .with_selector(selector);

        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "ml".to_string());
        labels.insert("env".to_string(), "prod".to_string());
        assert!(policy.matches_labels(&labels));

        labels.insert("team".to_string(), "platform".to_string());
        assert!(!policy.matches_labels(&labels));

        let no_selector = Policy::new("catch-all", vec![quota_rule()], 0).unwrap();
        assert!(no_selector.matches_labels(&BTreeMap::new()));
    }

    #[test]
    fn test_validate_rejects_bad_timezone() {
        let rule = PolicyRule::new(
            RuleConstraint::ChangeFreeze {
                windows: vec![],
                recurring: Some(RecurringFreeze {
                    days_of_week: vec![FreezeDay::Sat],
                    hours: vec![],
                    tz: "Mars/Olympus".to_string(),
                }),
                exempt_sources: vec![],
            },
            RuleAction::Reject,
        );
        assert!(Policy::new("freeze", vec![rule], 100).is_err());
    }

    #[test]
    fn test_absolute_window_activity() {
        let window = FreezeWindow {
            start: Utc.with_ymd_and_hms(2026, 11, 27, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 11, 28, 0, 0, 0).unwrap(),
            tz: "UTC".to_string(),
            reason: Some("Black Friday freeze".to_string()),
        };
        let inside = Utc.with_ymd_and_hms(2026, 11, 27, 12, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 11, 29, 12, 0, 0).unwrap();
        assert!(window.is_active(inside));
        assert!(!window.is_active(outside));
    }

    #[test]
    fn test_recurring_weekend_freeze() {
        let freeze = RecurringFreeze {
            days_of_week: vec![FreezeDay::Sat, FreezeDay::Sun],
            hours: vec![],
            tz: "UTC".to_string(),
        };
        // 2026-08-01 is a Saturday
        let saturday = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        assert!(freeze.is_active(saturday));
        assert!(!freeze.is_active(monday));
    }

    #[test]
    fn test_recurring_freeze_respects_timezone() {
        let freeze = RecurringFreeze {
            days_of_week: vec![],
            hours: vec![22, 23],
            tz: "Europe/Madrid".to_string(),
        };
        // 21:30 UTC in summer is 23:30 in Madrid (CEST)
        let evening = Utc.with_ymd_and_hms(2026, 7, 15, 21, 30, 0).unwrap();
        assert!(freeze.is_active(evening));
        // 12:00 UTC is 14:00 in Madrid
        let midday = Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap();
        assert!(!freeze.is_active(midday));
    }

    #[test]
    fn test_rule_serde_shape() {
        let rule = quota_rule();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["type"], "quota");
        assert_eq!(json["action"], "reject");
        let back: PolicyRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }
}
