//! Canary controller scenarios: the happy path through promotion, abort
//! on degraded health, boundary configurations and manual aborts.
//!
//! All tests run on the paused tokio clock; waits auto-advance, so a
//! full rollout finishes in milliseconds of real time.

mod common;

use artzain_server_domain::canary::CanaryConfig;
use artzain_server_domain::deployments::DeploymentStrategy;
use artzain_server_domain::events::DomainEvent;
use artzain_server_domain::plans::UpdateParams;
use artzain_server_domain::repository::{DeploymentRepository, WorkloadRepository};
use artzain_server_domain::shared_kernel::CanaryPhase;

use common::{PodsMode, TestEnv};

fn fast_config() -> CanaryConfig {
    CanaryConfig {
        initial_percent: 20,
        increment_percent: 20,
        step_duration_seconds: 60,
        min_health_score: 0.85,
        analysis_samples: 3,
        max_duration_seconds: 3600,
        auto_promote: true,
        abort_on_failure: true,
    }
}

fn update_to(image: &str) -> UpdateParams {
    UpdateParams {
        image: Some(image.to_string()),
        ..Default::default()
    }
}

/// With all pods ready at every sample the rollout walks
/// 20 > 40 > 60 > 80 > 100 and promotes; exactly 5 step transitions.
#[tokio::test(start_paused = true)]
async fn canary_happy_path_promotes() {
    let env = TestEnv::new();
    let (workload, deployment_id) = env
        .seed_deployment("resnet-serving", 10, DeploymentStrategy::Canary)
        .await;

    let canary_id = env
        .canary
        .start(deployment_id, update_to("registry/resnet-serving:2"), Some(fast_config()))
        .await
        .unwrap();

    let state = env.canary.wait_terminal(canary_id).await.unwrap();
    assert_eq!(state.phase, CanaryPhase::Promoted);
    assert_eq!(state.canary_percent, 100);
    assert_eq!(state.step, 5);

    // Exactly 5 step transitions were announced
    assert_eq!(env.bus.published_of_type("canary.step_promoted").len(), 5);
    assert_eq!(env.bus.published_of_type("canary.promoted").len(), 1);
    assert!(env.bus.published_of_type("canary.failed").is_empty());

    // Stable carries the new spec at full size; the canary track is gone
    let stable = env.driver.resource("ml-serving", "resnet-serving").unwrap();
    assert_eq!(stable.image, "registry/resnet-serving:2");
    assert_eq!(stable.replicas, 10);
    assert!(env
        .driver
        .resource("ml-serving", "resnet-serving-canary")
        .is_none());

    // The workload record follows the promoted image
    let workload = env.workloads.get(workload.id).await.unwrap().unwrap();
    assert_eq!(workload.image, "registry/resnet-serving:2");

    // The deployment's canary slot is free again
    let deployment = env.deployments.get(deployment_id).await.unwrap().unwrap();
    assert!(deployment.active_canary_id.is_none());
}

/// Healthy through step 2, then every sample scores 0.40. The rollout
/// fails, the canary is torn down and stable is restored to its
/// pre-start replica count.
#[tokio::test(start_paused = true)]
async fn canary_aborts_on_degraded_health() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("resnet-serving", 10, DeploymentStrategy::Canary)
        .await;

    // Readiness gate (3 samples) + two healthy step windows (3 each),
    // then unready pods for the rest of the rollout.
    env.driver
        .push_pod_modes("resnet-serving-canary", vec![PodsMode::AllReady; 9]);
    env.driver
        .set_default_mode("resnet-serving-canary", PodsMode::NoneReady);

    let canary_id = env
        .canary
        .start(deployment_id, update_to("registry/resnet-serving:2"), Some(fast_config()))
        .await
        .unwrap();

    let state = env.canary.wait_terminal(canary_id).await.unwrap();
    assert_eq!(state.phase, CanaryPhase::Failed);
    assert!(state.abort_reason.is_some());

    let failed = env.bus.published_of_type("canary.failed");
    assert_eq!(failed.len(), 1);
    match &failed[0] {
        DomainEvent::CanaryFailed { last_score, .. } => {
            let score = last_score.expect("last score recorded");
            assert!((score - 0.40).abs() < 1e-6, "score {}", score);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Canary removed, stable back at the pre-start replica count
    assert!(env
        .driver
        .resource("ml-serving", "resnet-serving-canary")
        .is_none());
    let stable = env.driver.resource("ml-serving", "resnet-serving").unwrap();
    assert_eq!(stable.replicas, 10);
    assert_eq!(stable.image, "registry/resnet-serving:1");
}

/// Boundary: `initial_percent = 100` promotes within a single step.
#[tokio::test(start_paused = true)]
async fn canary_with_full_initial_percent_promotes_in_one_step() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("resnet-serving", 4, DeploymentStrategy::Canary)
        .await;

    let mut config = fast_config();
    config.initial_percent = 100;

    let canary_id = env
        .canary
        .start(deployment_id, update_to("registry/resnet-serving:2"), Some(config))
        .await
        .unwrap();

    let state = env.canary.wait_terminal(canary_id).await.unwrap();
    assert_eq!(state.phase, CanaryPhase::Promoted);
    assert_eq!(state.step, 1);
    assert_eq!(env.bus.published_of_type("canary.step_promoted").len(), 1);
}

/// A manual abort forces `failed` and restores the stable track.
#[tokio::test(start_paused = true)]
async fn manual_abort_fails_rollout() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("resnet-serving", 10, DeploymentStrategy::Canary)
        .await;

    let mut config = fast_config();
    config.step_duration_seconds = 3600; // long steps so the abort lands mid-step
    config.max_duration_seconds = 7200;

    let canary_id = env
        .canary
        .start(deployment_id, update_to("registry/resnet-serving:2"), Some(config))
        .await
        .unwrap();

    env.canary
        .abort(canary_id, "operator requested abort")
        .await
        .unwrap();

    let state = env.canary.wait_terminal(canary_id).await.unwrap();
    assert_eq!(state.phase, CanaryPhase::Failed);
    assert_eq!(
        state.abort_reason.as_deref(),
        Some("operator requested abort")
    );

    // Aborting again is an error: the canary is terminal
    let error = env.canary.abort(canary_id, "again").await;
    assert!(error.is_err());

    let stable = env.driver.resource("ml-serving", "resnet-serving").unwrap();
    assert_eq!(stable.replicas, 10);
}

/// A canary whose pods never appear terminates well within the
/// duration ceiling: the readiness gate scores it zero and aborts.
#[tokio::test(start_paused = true)]
async fn canary_terminates_when_pods_never_appear() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("resnet-serving", 10, DeploymentStrategy::Canary)
        .await;

    // Pods never appear, so the readiness gate can never pass
    env.driver
        .set_default_mode("resnet-serving-canary", PodsMode::Empty);

    let mut config = fast_config();
    config.step_duration_seconds = 60;
    config.max_duration_seconds = 120;

    let canary_id = env
        .canary
        .start(deployment_id, update_to("registry/resnet-serving:2"), Some(config))
        .await
        .unwrap();

    let state = env.canary.wait_terminal(canary_id).await.unwrap();
    assert_eq!(state.phase, CanaryPhase::Failed);
}

/// A second canary on the same deployment is refused while one is
/// active.
#[tokio::test(start_paused = true)]
async fn single_active_canary_per_deployment() {
    let env = TestEnv::new();
    let (_, deployment_id) = env
        .seed_deployment("resnet-serving", 10, DeploymentStrategy::Canary)
        .await;

    let mut config = fast_config();
    config.step_duration_seconds = 3600;
    config.max_duration_seconds = 7200;

    let first = env
        .canary
        .start(deployment_id, update_to("registry/resnet-serving:2"), Some(config.clone()))
        .await
        .unwrap();

    let second = env
        .canary
        .start(deployment_id, update_to("registry/resnet-serving:3"), Some(config))
        .await;
    assert!(second.is_err());

    env.canary.abort(first, "cleanup").await.unwrap();
    env.canary.wait_terminal(first).await.unwrap();
}
