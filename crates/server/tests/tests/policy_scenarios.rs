//! Policy evaluation scenarios: cost-ceiling rejection, dry-run
//! approval, change-freeze exemptions and plan idempotence.

mod common;

use chrono::{Datelike, Utc, Weekday};

use artzain_server_domain::plans::PlanSource;
use artzain_server_domain::policies::{
    EvaluationMode, FreezeDay, Policy, PolicyRule, RecurringFreeze, RuleAction, RuleConstraint,
    RuleType,
};
use artzain_server_domain::shared_kernel::{DomainError, PlanStatus};

use common::{scenario_price_table, TestEnv};

fn cost_cap_policy(max_usd_per_hour: f64) -> Policy {
    Policy::new(
        "cap",
        vec![PolicyRule::new(
            RuleConstraint::CostCeiling {
                max_usd_per_hour,
                cost_source: None,
            },
            RuleAction::Reject,
        )],
        100,
    )
    .unwrap()
}

fn today_as_freeze_day() -> FreezeDay {
    match Utc::now().weekday() {
        Weekday::Mon => FreezeDay::Mon,
        Weekday::Tue => FreezeDay::Tue,
        Weekday::Wed => FreezeDay::Wed,
        Weekday::Thu => FreezeDay::Thu,
        Weekday::Fri => FreezeDay::Fri,
        Weekday::Sat => FreezeDay::Sat,
        Weekday::Sun => FreezeDay::Sun,
    }
}

/// A scale to 10 replicas of a 2-core + 1xL4 workload costs
/// 10 * (2 * 0.05 + 0.60) = 7.00 USD/hour, above the 1.00 ceiling.
#[tokio::test]
async fn cost_ceiling_rejects_plan() {
    let env = TestEnv::with_price_table(scenario_price_table());
    let (workload, _) = env
        .seed_deployment("bert-serving", 4, artzain_server_domain::deployments::DeploymentStrategy::Rolling)
        .await;
    env.service
        .register_policy(cost_cap_policy(1.0))
        .await
        .unwrap();

    let plan = env.scale_plan(&workload, 10, PlanSource::Api);
    let plan_id = plan.id;
    let error = env
        .service
        .submit_action_plan(plan, None)
        .await
        .expect_err("plan must be rejected");

    match error {
        DomainError::PolicyRejected { violations, .. } => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].rule_type, RuleType::CostCeiling);
            assert!(violations[0].message.contains("7.00"), "{}", violations[0].message);
        }
        other => panic!("unexpected error: {}", other),
    }

    // Stored result reflects the rejection
    let stored = env.service.get_plan_status(plan_id).await.unwrap();
    assert_eq!(stored.status, PlanStatus::Rejected);
    assert!(!stored.approved);

    // No driver mutation happened
    assert_eq!(env.driver.call_count("scale:"), 0);

    // Rejection and violation events were emitted
    assert_eq!(env.bus.published_of_type("plan.rejected").len(), 1);
    assert_eq!(env.bus.published_of_type("policy.violation").len(), 1);
}

/// The same plan in dry-run records the violation but approves and
/// completes, with no driver calls.
#[tokio::test]
async fn dry_run_records_but_approves() {
    let env = TestEnv::with_price_table(scenario_price_table());
    let (workload, _) = env
        .seed_deployment("bert-serving", 4, artzain_server_domain::deployments::DeploymentStrategy::Rolling)
        .await;
    env.service
        .register_policy(cost_cap_policy(1.0))
        .await
        .unwrap();

    let plan = env.scale_plan(&workload, 10, PlanSource::Api);
    let result = env
        .service
        .submit_action_plan(plan, Some(EvaluationMode::DryRun))
        .await
        .unwrap();

    assert_eq!(result.status, PlanStatus::Completed);
    assert!(result.approved);
    assert!(!result.shadow);
    assert_eq!(result.mode, EvaluationMode::DryRun);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].rule_type, RuleType::CostCeiling);

    assert_eq!(env.driver.call_count("scale:"), 0);
}

/// Shadow mode evaluates and audits but dispatches nothing; the result
/// is tagged.
#[tokio::test]
async fn shadow_mode_tags_result_and_skips_driver() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("bert-serving", 4, artzain_server_domain::deployments::DeploymentStrategy::Rolling)
        .await;

    let plan = env.scale_plan(&workload, 8, PlanSource::Api);
    let result = env
        .service
        .submit_action_plan(plan, Some(EvaluationMode::Shadow))
        .await
        .unwrap();

    assert!(result.shadow);
    assert_eq!(result.status, PlanStatus::Completed);
    assert_eq!(env.driver.call_count("scale:"), 0);
    assert_eq!(env.bus.published_of_type("plan.shadow_executed").len(), 1);
}

/// A recurring freeze covering today rejects plans from the API but
/// exempts the bridge.
#[tokio::test]
async fn change_freeze_blocks_unless_exempted() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("bert-serving", 4, artzain_server_domain::deployments::DeploymentStrategy::Rolling)
        .await;

    let freeze = Policy::new(
        "freeze",
        vec![PolicyRule::new(
            RuleConstraint::ChangeFreeze {
                windows: vec![],
                recurring: Some(RecurringFreeze {
                    days_of_week: vec![today_as_freeze_day()],
                    hours: vec![],
                    tz: "UTC".to_string(),
                }),
                exempt_sources: vec![PlanSource::Bridge],
            },
            RuleAction::Reject,
        )],
        200,
    )
    .unwrap();
    env.service.register_policy(freeze).await.unwrap();

    let from_api = env.scale_plan(&workload, 6, PlanSource::Api);
    let error = env.service.submit_action_plan(from_api, None).await;
    assert!(matches!(error, Err(DomainError::PolicyRejected { .. })));

    let from_bridge = env.scale_plan(&workload, 6, PlanSource::Bridge);
    let result = env.service.submit_action_plan(from_bridge, None).await.unwrap();
    assert_eq!(result.status, PlanStatus::Completed);
    assert_eq!(env.driver.call_count("scale:"), 1);
}

/// Empty policy set: every plan is approved.
#[tokio::test]
async fn empty_policy_set_approves() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("bert-serving", 4, artzain_server_domain::deployments::DeploymentStrategy::Rolling)
        .await;

    let plan = env.scale_plan(&workload, 2, PlanSource::Operator);
    let result = env.service.submit_action_plan(plan, None).await.unwrap();
    assert_eq!(result.status, PlanStatus::Completed);
    assert!(result.violations.is_empty());
}

/// Submitting an already-completed plan id returns the stored result
/// without re-executing anything.
#[tokio::test]
async fn completed_plan_resubmission_is_idempotent() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("bert-serving", 4, artzain_server_domain::deployments::DeploymentStrategy::Rolling)
        .await;

    let plan = env.scale_plan(&workload, 6, PlanSource::Api);
    let first = env.service.submit_action_plan(plan.clone(), None).await.unwrap();
    assert_eq!(first.status, PlanStatus::Completed);
    let scale_calls = env.driver.call_count("scale:");

    let second = env.service.submit_action_plan(plan, None).await.unwrap();
    assert_eq!(second.status, PlanStatus::Completed);
    assert_eq!(second.plan_id, first.plan_id);
    assert_eq!(env.driver.call_count("scale:"), scale_calls, "no re-execution");
}
