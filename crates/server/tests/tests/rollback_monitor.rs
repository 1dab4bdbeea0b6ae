//! Rollback controller scenarios: sustained degradation triggers
//! exactly one rollback, cooldown suppression, counter resets and the
//! scale-to-zero boundary.

mod common;

use std::time::Duration;

use artzain_server_domain::deployments::DeploymentStrategy;
use artzain_server_domain::driver::{ClusterDriver, ResourcePatch};
use artzain_server_domain::repository::DeploymentRepository;
use artzain_server_domain::rollback::{RollbackConfig, RollbackReason};

use common::{PodsMode, TestEnv};

fn monitor_config() -> RollbackConfig {
    RollbackConfig {
        min_health_score: 0.70,
        check_interval_seconds: 10,
        consecutive_bad_threshold: 3,
        cooldown_seconds: 300,
        target_revision: None,
    }
}

/// Give a seeded resource a second revision so rollback has somewhere
/// to go.
async fn add_revision(env: &TestEnv, name: &str) {
    env.driver
        .update(
            name,
            "ml-serving",
            &ResourcePatch::image(format!("registry/{}:2", name)),
        )
        .await
        .unwrap();
}

async fn wait_for_records(env: &TestEnv, count: usize) {
    for _ in 0..2000 {
        if env.rollback.records().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!(
        "expected {} rollback records, got {}",
        count,
        env.rollback.records().len()
    );
}

/// Health goes good, bad, bad, bad; exactly one rollback fires after
/// the third bad check.
#[tokio::test(start_paused = true)]
async fn sustained_degradation_triggers_one_rollback() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("bert-serving", 4, DeploymentStrategy::Rolling)
        .await;
    add_revision(&env, "bert-serving").await;

    // 0.9-ish, then three bad checks, then healthy again
    env.driver.push_pod_modes(
        "bert-serving",
        vec![
            PodsMode::AllReady,
            PodsMode::NoneReady,
            PodsMode::NoneReady,
            PodsMode::NoneReady,
        ],
    );
    env.driver.set_default_mode("bert-serving", PodsMode::AllReady);

    env.rollback
        .register(deployment_id, Some(monitor_config()))
        .await
        .unwrap();

    wait_for_records(&env, 1).await;

    let records = env.rollback.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, RollbackReason::HealthScoreBelowThreshold);
    assert_eq!(records[0].deployment_id, deployment_id);

    assert_eq!(env.driver.call_count("rollback:"), 1);
    assert_eq!(
        env.bus.published_of_type("deployment.rollback_triggered").len(),
        1
    );
    assert_eq!(env.bus.published_of_type("deployment.rolled_back").len(), 1);

    // Rolled back to the previous image
    let state = env.driver.resource("ml-serving", "bert-serving").unwrap();
    assert_eq!(state.image, "registry/bert-serving:1");

    env.rollback.unregister(deployment_id);
}

/// With permanently bad health, the cooldown gates the second rollback:
/// between the two triggers only the post-cooldown checks run.
#[tokio::test(start_paused = true)]
async fn cooldown_suppresses_checks_between_rollbacks() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("bert-serving", 4, DeploymentStrategy::Rolling)
        .await;
    add_revision(&env, "bert-serving").await;

    env.driver.set_default_mode("bert-serving", PodsMode::NoneReady);

    env.rollback
        .register(deployment_id, Some(monitor_config()))
        .await
        .unwrap();

    wait_for_records(&env, 1).await;
    let checks_at_first = env.driver.call_count("list_pods:");

    wait_for_records(&env, 2).await;
    let checks_at_second = env.driver.call_count("list_pods:");

    // Cooldown skipped every interval in between: the second trigger
    // needed exactly the fresh consecutive-bad run.
    assert_eq!(checks_at_second - checks_at_first, 3);

    env.rollback.unregister(deployment_id);
}

/// A good check resets the consecutive-bad counter, so alternating
/// health never triggers.
#[tokio::test(start_paused = true)]
async fn good_check_resets_bad_counter() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("bert-serving", 4, DeploymentStrategy::Rolling)
        .await;
    add_revision(&env, "bert-serving").await;

    env.driver.push_pod_modes(
        "bert-serving",
        vec![
            PodsMode::NoneReady,
            PodsMode::NoneReady,
            PodsMode::AllReady,
            PodsMode::NoneReady,
            PodsMode::NoneReady,
            PodsMode::AllReady,
        ],
    );
    env.driver.set_default_mode("bert-serving", PodsMode::AllReady);

    env.rollback
        .register(deployment_id, Some(monitor_config()))
        .await
        .unwrap();

    // Let the scripted checks play out
    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    assert!(env.rollback.records().is_empty());
    assert_eq!(env.driver.call_count("rollback:"), 0);

    env.rollback.unregister(deployment_id);
}

/// Scale-to-zero is healthy by vacuity and never triggers a rollback.
#[tokio::test(start_paused = true)]
async fn scale_to_zero_never_triggers() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("bert-serving", 0, DeploymentStrategy::Rolling)
        .await;

    env.rollback
        .register(deployment_id, Some(monitor_config()))
        .await
        .unwrap();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    assert!(env.rollback.records().is_empty());

    env.rollback.unregister(deployment_id);
}

/// No pods observed for a deployment that wants replicas is `Unknown`,
/// not degradation; the monitor skips those checks.
#[tokio::test(start_paused = true)]
async fn unknown_health_is_not_degradation() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("bert-serving", 4, DeploymentStrategy::Rolling)
        .await;

    env.driver.set_default_mode("bert-serving", PodsMode::Empty);

    env.rollback
        .register(deployment_id, Some(monitor_config()))
        .await
        .unwrap();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    assert!(env.rollback.records().is_empty());

    env.rollback.unregister(deployment_id);
}

/// A deployment that reaches terminal status is unmonitored
/// automatically.
#[tokio::test(start_paused = true)]
async fn terminal_deployment_is_unmonitored() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("bert-serving", 4, DeploymentStrategy::Rolling)
        .await;

    env.rollback
        .register(deployment_id, Some(monitor_config()))
        .await
        .unwrap();
    assert_eq!(env.rollback.monitored_count(), 1);

    let mut deployment = env.deployments.get(deployment_id).await.unwrap().unwrap();
    deployment
        .transition(artzain_shared::DeploymentStatus::Completed)
        .unwrap();
    env.deployments.save(&deployment).await.unwrap();

    for _ in 0..50 {
        if env.rollback.monitored_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    assert_eq!(env.rollback.monitored_count(), 0);
}

/// Manual trigger through the service API, including the
/// no-previous-revision failure.
#[tokio::test]
async fn manual_trigger_and_missing_revision() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("bert-serving", 4, DeploymentStrategy::Rolling)
        .await;

    // Fresh resource: only revision 1 exists
    let error = env
        .service
        .trigger_rollback(deployment_id, RollbackReason::Manual, None, "operator")
        .await;
    assert!(error.is_err());

    add_revision(&env, "bert-serving").await;
    let record = env
        .service
        .trigger_rollback(deployment_id, RollbackReason::Manual, None, "operator")
        .await
        .unwrap();
    assert_eq!(record.reason, RollbackReason::Manual);
    assert_eq!(record.triggered_by, "operator");

    let state = env.driver.resource("ml-serving", "bert-serving").unwrap();
    assert_eq!(state.image, "registry/bert-serving:1");
}
