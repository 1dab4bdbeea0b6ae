//! Plan executor scenarios: dispatch per verb, failure handling, safety
//! checks and cancellation.

mod common;

use artzain_server_domain::deployments::DeploymentStrategy;
use artzain_server_domain::driver::{ClusterDriver, DriverError};
use artzain_server_domain::plans::{
    ActionPlan, Decision, DecisionParams, DecisionStatus, DecisionTarget, PlanSource,
    RestartParams, RollbackParams, ScaleParams, UpdateParams,
};
use artzain_server_domain::repository::DeploymentRepository;
use artzain_server_domain::shared_kernel::PlanStatus;

use common::TestEnv;

#[tokio::test]
async fn scale_decision_drives_driver_and_deployment() {
    let env = TestEnv::new();
    let (workload, deployment_id) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    let plan = env.scale_plan(&workload, 7, PlanSource::Api);
    let result = env.service.submit_action_plan(plan, None).await.unwrap();

    assert_eq!(result.status, PlanStatus::Completed);
    assert_eq!(result.decisions.len(), 1);
    assert_eq!(result.decisions[0].status, DecisionStatus::Succeeded);

    // Driver saw the scale, the deployment record followed
    assert_eq!(
        env.driver.resource("ml-serving", "resnet-serving").unwrap().replicas,
        7
    );
    let deployment = env.deployments.get(deployment_id).await.unwrap().unwrap();
    assert_eq!(deployment.replicas, 7);

    // Event trail: submitted, approved, decision pair, scaled, completed
    assert_eq!(env.bus.published_of_type("plan.submitted").len(), 1);
    assert_eq!(env.bus.published_of_type("plan.approved").len(), 1);
    assert_eq!(env.bus.published_of_type("decision.started").len(), 1);
    assert_eq!(env.bus.published_of_type("decision.completed").len(), 1);
    assert_eq!(env.bus.published_of_type("deployment.scaled").len(), 1);
    assert_eq!(env.bus.published_of_type("plan.completed").len(), 1);
}

#[tokio::test]
async fn decision_failure_does_not_abort_later_decisions_by_default() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    // First decision fails permanently, second should still run
    env.driver.fail_next(
        "scale",
        DriverError::Invalid {
            message: "injected".to_string(),
        },
    );

    let decisions = vec![
        Decision::new(
            DecisionParams::Scale(ScaleParams {
                replicas: 6,
                timeout_seconds: None,
            }),
            DecisionTarget::workload(workload.id, "ml-serving"),
        ),
        Decision::new(
            DecisionParams::Restart(RestartParams::default()),
            DecisionTarget::workload(workload.id, "ml-serving"),
        ),
    ];
    let plan = ActionPlan::new(decisions, PlanSource::Api).unwrap();
    let result = env.service.submit_action_plan(plan, None).await.unwrap();

    assert_eq!(result.status, PlanStatus::Failed);
    assert_eq!(result.decisions[0].status, DecisionStatus::Failed);
    assert_eq!(result.decisions[1].status, DecisionStatus::Succeeded);
    assert_eq!(env.bus.published_of_type("decision.failed").len(), 1);
    assert_eq!(env.bus.published_of_type("plan.failed").len(), 1);
}

#[tokio::test]
async fn abort_on_first_failure_skips_the_rest() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    env.driver.fail_next(
        "scale",
        DriverError::Invalid {
            message: "injected".to_string(),
        },
    );

    let decisions = vec![
        Decision::new(
            DecisionParams::Scale(ScaleParams {
                replicas: 6,
                timeout_seconds: None,
            }),
            DecisionTarget::workload(workload.id, "ml-serving"),
        ),
        Decision::new(
            DecisionParams::Restart(RestartParams::default()),
            DecisionTarget::workload(workload.id, "ml-serving"),
        ),
    ];
    let mut plan = ActionPlan::new(decisions, PlanSource::Api).unwrap();
    plan.abort_on_first_failure = true;

    let result = env.service.submit_action_plan(plan, None).await.unwrap();
    assert_eq!(result.status, PlanStatus::Failed);
    assert_eq!(result.decisions[0].status, DecisionStatus::Failed);
    assert_eq!(result.decisions[1].status, DecisionStatus::Skipped);
    // The restart never reached the driver
    assert_eq!(env.driver.call_count("update:"), 0);
}

#[tokio::test]
async fn blast_radius_check_refuses_oversized_scale() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    let mut decision = Decision::new(
        DecisionParams::Scale(ScaleParams {
            replicas: 10,
            timeout_seconds: None,
        }),
        DecisionTarget::workload(workload.id, "ml-serving"),
    );
    // 4 → 10 touches 150% of the current fleet
    decision.safety.max_blast_radius_percent = Some(50);

    let plan = ActionPlan::new(vec![decision], PlanSource::Api).unwrap();
    let result = env.service.submit_action_plan(plan, None).await.unwrap();

    assert_eq!(result.status, PlanStatus::Failed);
    assert_eq!(result.decisions[0].status, DecisionStatus::Skipped);
    assert!(result.decisions[0]
        .message
        .as_deref()
        .unwrap()
        .contains("blast_radius_exceeded"));
    assert_eq!(env.driver.call_count("scale:"), 0);
    assert_eq!(env.bus.published_of_type("decision.skipped").len(), 1);
}

#[tokio::test]
async fn rollback_decision_reverts_to_previous_revision() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    // Advance the resource to revision 2 so a previous revision exists
    env.driver
        .update(
            "resnet-serving",
            "ml-serving",
            &artzain_server_domain::driver::ResourcePatch::image("registry/resnet-serving:2"),
        )
        .await
        .unwrap();

    let decision = Decision::new(
        DecisionParams::Rollback(RollbackParams {
            revision: None,
            timeout_seconds: None,
        }),
        DecisionTarget::workload(workload.id, "ml-serving"),
    );
    let plan = ActionPlan::new(vec![decision], PlanSource::Operator).unwrap();
    let result = env.service.submit_action_plan(plan, None).await.unwrap();

    assert_eq!(result.status, PlanStatus::Completed);
    let state = env.driver.resource("ml-serving", "resnet-serving").unwrap();
    assert_eq!(state.image, "registry/resnet-serving:1");
    assert_eq!(env.bus.published_of_type("deployment.rolled_back").len(), 1);
}

#[tokio::test]
async fn rollback_without_history_fails_the_decision() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    let decision = Decision::new(
        DecisionParams::Rollback(RollbackParams::default()),
        DecisionTarget::workload(workload.id, "ml-serving"),
    );
    let plan = ActionPlan::new(vec![decision], PlanSource::Operator).unwrap();
    let result = env.service.submit_action_plan(plan, None).await.unwrap();

    assert_eq!(result.status, PlanStatus::Failed);
    assert!(result.decisions[0]
        .message
        .as_deref()
        .unwrap()
        .contains("No previous revision"));
}

#[tokio::test]
async fn reschedule_deletes_and_recreates_with_labels() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    let decision = Decision::new(
        DecisionParams::Reschedule(Default::default()),
        DecisionTarget::workload(workload.id, "ml-serving"),
    );
    let plan = ActionPlan::new(vec![decision], PlanSource::Bridge).unwrap();
    let result = env.service.submit_action_plan(plan, None).await.unwrap();

    assert_eq!(result.status, PlanStatus::Completed);
    assert_eq!(env.driver.call_count("delete:"), 1);
    assert_eq!(env.driver.call_count("create:"), 2); // seed + recreate

    let state = env.driver.resource("ml-serving", "resnet-serving").unwrap();
    assert_eq!(state.labels.get("managed-by").unwrap(), "artzain");
    assert_eq!(
        state.labels.get("workload-id").unwrap(),
        &workload.id.to_string()
    );
}

#[tokio::test]
async fn update_decision_with_canary_strategy_starts_canary() {
    let env = TestEnv::new();
    let (workload, deployment_id) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Canary)
        .await;

    let decision = Decision::new(
        DecisionParams::Update(UpdateParams {
            image: Some("registry/resnet-serving:2".to_string()),
            ..Default::default()
        }),
        DecisionTarget::workload(workload.id, "ml-serving"),
    );
    let plan = ActionPlan::new(vec![decision], PlanSource::Api).unwrap();
    let result = env.service.submit_action_plan(plan, None).await.unwrap();

    assert_eq!(result.status, PlanStatus::Completed);
    assert!(result.decisions[0]
        .message
        .as_deref()
        .unwrap()
        .contains("canary rollout"));
    assert_eq!(env.bus.published_of_type("canary.started").len(), 1);

    let deployment = env.deployments.get(deployment_id).await.unwrap().unwrap();
    assert!(deployment.active_canary_id.is_some());
}

#[tokio::test]
async fn approval_gate_holds_decision_until_ttl() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    let mut decision = Decision::new(
        DecisionParams::Scale(ScaleParams {
            replicas: 6,
            timeout_seconds: None,
        }),
        DecisionTarget::workload(workload.id, "ml-serving"),
    );
    decision.safety.requires_approval = true;
    decision.safety.ttl_seconds = 1;

    let plan = ActionPlan::new(vec![decision], PlanSource::Api).unwrap();
    let result = env.service.submit_action_plan(plan, None).await.unwrap();

    assert_eq!(result.status, PlanStatus::Failed);
    assert_eq!(result.decisions[0].status, DecisionStatus::AwaitingApproval);
    assert_eq!(env.driver.call_count("scale:"), 0);
}

#[tokio::test]
async fn pre_recorded_approval_lets_decision_run() {
    let env = TestEnv::new();
    let (workload, _) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Rolling)
        .await;

    let mut decision = Decision::new(
        DecisionParams::Scale(ScaleParams {
            replicas: 6,
            timeout_seconds: None,
        }),
        DecisionTarget::workload(workload.id, "ml-serving"),
    );
    decision.safety.requires_approval = true;

    let plan = ActionPlan::new(vec![decision], PlanSource::Api).unwrap();
    env.service.approve_decision(plan.id, 0);

    let result = env.service.submit_action_plan(plan, None).await.unwrap();
    assert_eq!(result.status, PlanStatus::Completed);
    assert_eq!(env.driver.call_count("scale:"), 1);
}
