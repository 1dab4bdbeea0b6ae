//! Shared test harness: a scripted fake cluster driver and a fully
//! wired controller core on in-memory infrastructure.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;

use artzain_server_application::plans::ExecutorSettings;
use artzain_server_application::policy::{
    NullObservationSource, PolicyEngine, PolicyEngineConfig, RateLimiter,
};
use artzain_server_application::{
    CanaryController, ControllerService, PlanExecutor, RollbackController,
};
use artzain_server_domain::canary::CanaryConfig;
use artzain_server_domain::clusters::Cluster;
use artzain_server_domain::deployments::{Deployment, DeploymentStrategy};
use artzain_server_domain::driver::{
    ClusterDriver, ContainerSnapshot, DriverError, DriverResult, PodPhase, PodSnapshot,
    ResourceKind, ResourcePatch, ResourceSpec, ResourceState, WatchEvent,
};
use artzain_server_domain::event_bus::EventBus;
use artzain_server_domain::health::HealthWeights;
use artzain_server_domain::plans::{
    ActionPlan, Decision, DecisionParams, DecisionTarget, PlanSource, ScaleParams,
};
use artzain_server_domain::repository::{DeploymentRepository, WorkloadRepository};
use artzain_server_domain::rollback::RollbackConfig;
use artzain_server_domain::shared_kernel::DeploymentId;
use artzain_server_domain::workloads::{ResourceRequest, Workload, WorkloadKind};
use artzain_server_infrastructure::messaging::InMemoryEventBus;
use artzain_server_infrastructure::persistence::{
    InMemoryClusterRepository, InMemoryDeploymentRepository, InMemoryPlanRepository,
    InMemoryPolicyRepository, InMemoryWorkloadRepository,
};
use artzain_shared::config::PriceTableConfig;

/// How the fake driver renders the pods of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodsMode {
    /// Every pod running and ready (health 1.0)
    AllReady,
    /// Every pod present but unready (health 0.40 with default weights)
    NoneReady,
    /// No pods at all
    Empty,
}

#[derive(Debug, Clone)]
struct FakeResource {
    state: ResourceState,
    image_history: Vec<String>,
}

/// Scripted in-process cluster driver.
///
/// Resources live in a map keyed by `(namespace, name)`; pod snapshots
/// are synthesized from the resource's replica count and a per-resource
/// mode script. Every call is recorded for assertions.
#[derive(Default)]
pub struct FakeDriver {
    resources: Mutex<HashMap<(String, String), FakeResource>>,
    calls: Mutex<Vec<String>>,
    mode_scripts: Mutex<HashMap<String, VecDeque<PodsMode>>>,
    default_modes: Mutex<HashMap<String, PodsMode>>,
    fail_once: Mutex<HashMap<String, DriverError>>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Recorded calls, formatted `method:name[:detail]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Queue pod modes consumed one `list_pods` call at a time.
    pub fn push_pod_modes(&self, name: &str, modes: Vec<PodsMode>) {
        self.mode_scripts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(modes);
    }

    /// Mode used once the script for `name` is exhausted.
    pub fn set_default_mode(&self, name: &str, mode: PodsMode) {
        self.default_modes
            .lock()
            .unwrap()
            .insert(name.to_string(), mode);
    }

    /// Make the next call of `method` fail with `error`.
    pub fn fail_next(&self, method: &str, error: DriverError) {
        self.fail_once
            .lock()
            .unwrap()
            .insert(method.to_string(), error);
    }

    pub fn resource(&self, namespace: &str, name: &str) -> Option<ResourceState> {
        self.resources
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .map(|r| r.state.clone())
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(&self, method: &str) -> Option<DriverError> {
        self.fail_once.lock().unwrap().remove(method)
    }

    fn next_mode(&self, name: &str) -> PodsMode {
        if let Some(script) = self.mode_scripts.lock().unwrap().get_mut(name) {
            if let Some(mode) = script.pop_front() {
                return mode;
            }
        }
        self.default_modes
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(PodsMode::AllReady)
    }

    fn synthesize_pods(&self, name: &str, replicas: i32) -> Vec<PodSnapshot> {
        let mode = self.next_mode(name);
        let created_at = Some(Utc::now() - ChronoDuration::hours(2));
        match mode {
            PodsMode::Empty => Vec::new(),
            PodsMode::AllReady => (0..replicas.max(0))
                .map(|i| PodSnapshot {
                    name: format!("{}-{}", name, i),
                    phase: PodPhase::Running,
                    ready: true,
                    restart_count: 0,
                    created_at,
                    containers: vec![ContainerSnapshot {
                        name: name.to_string(),
                        ready: true,
                        waiting_reason: None,
                    }],
                })
                .collect(),
            PodsMode::NoneReady => (0..replicas.max(0))
                .map(|i| PodSnapshot {
                    name: format!("{}-{}", name, i),
                    phase: PodPhase::Pending,
                    ready: false,
                    restart_count: 0,
                    created_at,
                    containers: vec![ContainerSnapshot {
                        name: name.to_string(),
                        ready: false,
                        waiting_reason: None,
                    }],
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ClusterDriver for FakeDriver {
    async fn create(&self, spec: &ResourceSpec) -> DriverResult<ResourceState> {
        self.record(format!("create:{}", spec.name));
        if let Some(error) = self.take_failure("create") {
            return Err(error);
        }

        let key = (spec.namespace.clone(), spec.name.clone());
        let mut resources = self.resources.lock().unwrap();
        if let Some(existing) = resources.get(&key) {
            return if existing.state.is_managed() {
                Ok(existing.state.clone())
            } else {
                Err(DriverError::AlreadyExists {
                    namespace: spec.namespace.clone(),
                    name: spec.name.clone(),
                })
            };
        }

        let mut labels = spec.labels.clone();
        labels
            .entry("managed-by".to_string())
            .or_insert_with(|| "artzain".to_string());
        let state = ResourceState {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            kind: spec.kind,
            replicas: spec.replicas,
            ready_replicas: spec.replicas,
            labels,
            annotations: spec.annotations.clone(),
            revision: 1,
            image: spec.image.clone(),
            created_at: Some(Utc::now()),
        };
        resources.insert(
            key,
            FakeResource {
                state: state.clone(),
                image_history: vec![spec.image.clone()],
            },
        );
        Ok(state)
    }

    async fn get(
        &self,
        _kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> DriverResult<Option<ResourceState>> {
        self.record(format!("get:{}", name));
        if let Some(error) = self.take_failure("get") {
            return Err(error);
        }
        Ok(self.resource(namespace, name))
    }

    async fn scale(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> DriverResult<ResourceState> {
        self.record(format!("scale:{}:{}", name, replicas));
        if let Some(error) = self.take_failure("scale") {
            return Err(error);
        }
        if !(0..=10_000).contains(&replicas) {
            return Err(DriverError::Invalid {
                message: format!("replica count {} out of range", replicas),
            });
        }
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| DriverError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        resource.state.replicas = replicas;
        resource.state.ready_replicas = replicas;
        Ok(resource.state.clone())
    }

    async fn update(
        &self,
        name: &str,
        namespace: &str,
        patch: &ResourcePatch,
    ) -> DriverResult<ResourceState> {
        self.record(format!("update:{}", name));
        if let Some(error) = self.take_failure("update") {
            return Err(error);
        }
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| DriverError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        if let Some(image) = &patch.image {
            if *image != resource.state.image {
                resource.image_history.push(image.clone());
                resource.state.revision += 1;
            }
            resource.state.image = image.clone();
        }
        if let Some(replicas) = patch.replicas {
            resource.state.replicas = replicas;
        }
        if let Some(annotations) = &patch.annotations {
            resource
                .state
                .annotations
                .extend(annotations.clone());
        }
        Ok(resource.state.clone())
    }

    async fn rollback(
        &self,
        name: &str,
        namespace: &str,
        to_revision: Option<i64>,
    ) -> DriverResult<ResourceState> {
        self.record(format!("rollback:{}", name));
        if let Some(error) = self.take_failure("rollback") {
            return Err(error);
        }
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| DriverError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let target = to_revision.unwrap_or(resource.state.revision - 1);
        if target < 1 || (target as usize) > resource.image_history.len() {
            return Err(DriverError::NoPreviousRevision {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        resource.state.image = resource.image_history[(target - 1) as usize].clone();
        resource.state.revision += 1;
        Ok(resource.state.clone())
    }

    async fn delete(
        &self,
        _kind: ResourceKind,
        name: &str,
        namespace: &str,
        _grace_seconds: Option<u32>,
    ) -> DriverResult<()> {
        self.record(format!("delete:{}", name));
        if let Some(error) = self.take_failure("delete") {
            return Err(error);
        }
        let removed = self
            .resources
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        if removed.is_none() {
            return Err(DriverError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn list_pods(&self, name: &str, namespace: &str) -> DriverResult<Vec<PodSnapshot>> {
        self.record(format!("list_pods:{}", name));
        if let Some(error) = self.take_failure("list_pods") {
            return Err(error);
        }
        let replicas = self
            .resource(namespace, name)
            .map(|r| r.replicas)
            .unwrap_or(0);
        Ok(self.synthesize_pods(name, replicas))
    }

    async fn watch(
        &self,
        _kind: ResourceKind,
        _namespace: &str,
        _label_selector: Option<String>,
    ) -> DriverResult<BoxStream<'static, DriverResult<WatchEvent>>> {
        self.record("watch".to_string());
        Ok(futures::stream::empty().boxed())
    }
}

/// A fully wired controller core on fake infrastructure.
pub struct TestEnv {
    pub driver: Arc<FakeDriver>,
    pub bus: Arc<InMemoryEventBus>,
    pub engine: Arc<PolicyEngine>,
    pub canary: Arc<CanaryController>,
    pub rollback: Arc<RollbackController>,
    pub executor: Arc<PlanExecutor>,
    pub service: ControllerService,
    pub workloads: Arc<InMemoryWorkloadRepository>,
    pub deployments: Arc<InMemoryDeploymentRepository>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_price_table(PriceTableConfig::default())
    }

    pub fn with_price_table(price_table: PriceTableConfig) -> Self {
        let driver = FakeDriver::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let workloads = Arc::new(InMemoryWorkloadRepository::new());
        let clusters = Arc::new(InMemoryClusterRepository::new());
        let deployments = Arc::new(InMemoryDeploymentRepository::new());
        let policies = Arc::new(InMemoryPolicyRepository::new());
        let plans = Arc::new(InMemoryPlanRepository::new());
        let weights = HealthWeights::default();

        let engine = Arc::new(PolicyEngine::new(
            Arc::new(RateLimiter::new()),
            Arc::new(NullObservationSource),
            workloads.clone(),
            deployments.clone(),
            PolicyEngineConfig {
                price_table,
                ..Default::default()
            },
        ));

        let canary = CanaryController::new(
            driver.clone() as Arc<dyn ClusterDriver>,
            workloads.clone(),
            deployments.clone(),
            bus.clone() as Arc<dyn EventBus>,
            weights,
            CanaryConfig::default(),
        );

        let rollback = RollbackController::new(
            driver.clone() as Arc<dyn ClusterDriver>,
            workloads.clone(),
            deployments.clone(),
            bus.clone() as Arc<dyn EventBus>,
            weights,
            RollbackConfig::default(),
        );

        let executor = PlanExecutor::new(
            engine.clone(),
            driver.clone() as Arc<dyn ClusterDriver>,
            canary.clone(),
            workloads.clone(),
            deployments.clone(),
            plans.clone(),
            bus.clone() as Arc<dyn EventBus>,
            ExecutorSettings::default(),
        );

        let service = ControllerService::new(
            executor.clone(),
            canary.clone(),
            rollback.clone(),
            engine.clone(),
            workloads.clone(),
            clusters.clone(),
            deployments.clone(),
            policies,
            plans,
            bus.clone() as Arc<dyn EventBus>,
        );

        Self {
            driver,
            bus,
            engine,
            canary,
            rollback,
            executor,
            service,
            workloads,
            deployments,
        }
    }

    /// Seed a workload plus a running deployment backed by a driver
    /// resource, returning `(workload, deployment_id)`.
    pub async fn seed_deployment(
        &self,
        name: &str,
        replicas: i32,
        strategy: DeploymentStrategy,
    ) -> (Workload, DeploymentId) {
        let workload = Workload::new(
            name,
            WorkloadKind::Inference,
            format!("registry/{}:1", name),
            ResourceRequest::new(2000, 4 * 1024 * 1024 * 1024).with_gpu(1, "L4"),
        )
        .unwrap();
        self.workloads.save(&workload).await.unwrap();

        let cluster = Cluster::new("test-cluster", "kubeconfig:test").unwrap();

        let mut deployment = Deployment::new(
            workload.id,
            cluster.id,
            "ml-serving",
            replicas,
            strategy,
        )
        .unwrap();
        deployment
            .transition(artzain_shared::DeploymentStatus::Running)
            .unwrap();
        self.deployments.save(&deployment).await.unwrap();

        let mut spec = ResourceSpec::new(name, "ml-serving", &workload.image)
            .with_replicas(replicas)
            .with_labels(artzain_server_domain::driver::managed_labels(
                &workload.id.to_string(),
            ));
        spec.cpu_millis = workload.resources.cpu_millis;
        spec.memory_bytes = workload.resources.memory_bytes;
        spec.gpu_count = workload.resources.gpu_count();
        self.driver.create(&spec).await.unwrap();

        (workload, deployment.id)
    }

    pub fn scale_plan(&self, workload: &Workload, replicas: i32, source: PlanSource) -> ActionPlan {
        let decision = Decision::new(
            DecisionParams::Scale(ScaleParams {
                replicas,
                timeout_seconds: None,
            }),
            DecisionTarget::workload(workload.id, "ml-serving"),
        );
        ActionPlan::new(vec![decision], source).unwrap()
    }
}

/// Price table used by the cost-ceiling scenarios:
/// cpu 0.05 USD/core-hour, L4 0.60 USD/hour.
pub fn scenario_price_table() -> PriceTableConfig {
    let mut table = PriceTableConfig::default();
    table.cpu_core_hour = 0.05;
    table.gpu_hour.insert("L4".to_string(), 0.60);
    table
}
