//! Artzain controller server.
//!
//! Wires the controller core: configuration, logging, event bus,
//! cluster driver, repositories and the four control subsystems. The
//! request surface (HTTP) is hosted by a separate layer that calls into
//! `ControllerService`.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use artzain_shared::config::ConfigLoader;
use artzain_server_application::plans::ExecutorSettings;
use artzain_server_application::policy::{
    NullObservationSource, PolicyEngine, PolicyEngineConfig, RateLimiter,
};
use artzain_server_application::{
    CanaryController, ControllerService, PlanExecutor, RollbackController,
};
use artzain_server_domain::driver::ClusterDriver;
use artzain_server_domain::event_bus::EventBus;
use artzain_server_domain::health::HealthWeights;
use artzain_server_infrastructure::kubernetes::KubernetesDriver;
use artzain_server_infrastructure::messaging::{InMemoryEventBus, NatsEventBus};
use artzain_server_infrastructure::persistence::{
    InMemoryClusterRepository, InMemoryDeploymentRepository, InMemoryPlanRepository,
    InMemoryPolicyRepository, InMemoryWorkloadRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new(None).load_controller_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting artzain workload controller");

    // Event bus: JetStream when enabled, in-memory otherwise
    let bus: Arc<dyn EventBus> = if config.nats.enabled {
        Arc::new(NatsEventBus::connect(&config.nats).await?)
    } else {
        warn!("NATS disabled, running on the in-memory event bus");
        Arc::new(InMemoryEventBus::new())
    };

    let driver: Arc<dyn ClusterDriver> = Arc::new(KubernetesDriver::connect().await?);

    let workloads = Arc::new(InMemoryWorkloadRepository::new());
    let clusters = Arc::new(InMemoryClusterRepository::new());
    let deployments = Arc::new(InMemoryDeploymentRepository::new());
    let policies = Arc::new(InMemoryPolicyRepository::new());
    let plans = Arc::new(InMemoryPlanRepository::new());

    let weights: HealthWeights = config.health.clone().into();

    let engine = Arc::new(PolicyEngine::new(
        Arc::new(RateLimiter::new()),
        Arc::new(NullObservationSource),
        workloads.clone(),
        deployments.clone(),
        PolicyEngineConfig {
            price_table: config.price_table.clone(),
            ..Default::default()
        },
    ));

    let canary = CanaryController::new(
        driver.clone(),
        workloads.clone(),
        deployments.clone(),
        bus.clone(),
        weights,
        config.canary.clone().into(),
    );

    let rollback = RollbackController::new(
        driver.clone(),
        workloads.clone(),
        deployments.clone(),
        bus.clone(),
        weights,
        config.rollback.clone().into(),
    );

    let executor = PlanExecutor::new(
        engine.clone(),
        driver.clone(),
        canary.clone(),
        workloads.clone(),
        deployments.clone(),
        plans.clone(),
        bus.clone(),
        ExecutorSettings::from_config(&config.executor),
    );

    let _service = ControllerService::new(
        executor,
        canary,
        rollback,
        engine,
        workloads,
        clusters,
        deployments,
        policies,
        plans,
        bus,
    );

    info!(
        max_concurrent_plans = config.executor.max_concurrent_plans,
        mode = %config.executor.policy_default_mode,
        "controller core ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping");

    Ok(())
}
