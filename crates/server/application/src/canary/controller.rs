//! Progressive canary rollouts.
//!
//! One controller task per active canary drives the six-phase state
//! machine: create the canary track, gate on health, shift traffic by
//! scaling the two tracks against each other, then promote or abort.
//! Traffic split is approximated by relative replica counts.
//!
//! The task is guaranteed to reach a terminal phase within the
//! configured maximum duration: every wait races the rollout deadline
//! and the abort token.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

use artzain_server_domain::canary::{CanaryConfig, CanaryState};
use artzain_server_domain::deployments::Deployment;
use artzain_server_domain::driver::{
    managed_labels, ClusterDriver, DriverError, ResourceKind, ResourcePatch, ResourceSpec,
};
use artzain_server_domain::event_bus::EventBus;
use artzain_server_domain::events::DomainEvent;
use artzain_server_domain::health::{evaluate_deployment_health, HealthStatus, HealthWeights};
use artzain_server_domain::plans::UpdateParams;
use artzain_server_domain::repository::{DeploymentRepository, WorkloadRepository};
use artzain_server_domain::shared_kernel::{
    CanaryId, CanaryPhase, DeploymentId, DomainError, Result,
};
use artzain_server_domain::workloads::Workload;
use tokio_util::sync::CancellationToken;

use crate::emitter::EventEmitter;

/// Label marking which rollout track a resource belongs to.
const TRACK_LABEL: &str = "rollout-track";
/// Annotation carrying the owning canary id.
const CANARY_ID_ANNOTATION: &str = "artzain.io/canary-id";

struct CanaryHandle {
    state: Arc<RwLock<CanaryState>>,
    cancel: CancellationToken,
    abort_reason: Arc<Mutex<Option<String>>>,
}

/// Drives progressive rollouts; one background task per active canary.
pub struct CanaryController {
    driver: Arc<dyn ClusterDriver>,
    workloads: Arc<dyn WorkloadRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    bus: Arc<dyn EventBus>,
    weights: HealthWeights,
    defaults: CanaryConfig,
    active: DashMap<CanaryId, CanaryHandle>,
}

impl CanaryController {
    pub fn new(
        driver: Arc<dyn ClusterDriver>,
        workloads: Arc<dyn WorkloadRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        bus: Arc<dyn EventBus>,
        weights: HealthWeights,
        defaults: CanaryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            workloads,
            deployments,
            bus,
            weights,
            defaults,
            active: DashMap::new(),
        })
    }

    /// Start a canary rollout applying `update` to the deployment's
    /// workload. Returns the canary id; the rollout runs in the
    /// background until a terminal phase.
    pub async fn start(
        self: &Arc<Self>,
        deployment_id: DeploymentId,
        update: UpdateParams,
        config: Option<CanaryConfig>,
    ) -> Result<CanaryId> {
        let mut deployment = self
            .deployments
            .get(deployment_id)
            .await?
            .ok_or(DomainError::DeploymentNotFound { deployment_id })?;

        let workload = self
            .workloads
            .get(deployment.workload_id)
            .await?
            .ok_or(DomainError::WorkloadNotFound {
                workload_id: deployment.workload_id,
            })?;

        let new_image = update.image.clone().ok_or_else(|| DomainError::InvalidInput {
            field: "update.image".to_string(),
            reason: "a canary rollout requires a new image".to_string(),
        })?;

        let config = config
            .or_else(|| deployment.canary_config.clone())
            .unwrap_or_else(|| self.defaults.clone());
        config.validate()?;

        let state = CanaryState::new(deployment_id, config.clone());
        let canary_id = state.id;

        // At most one active canary per deployment
        deployment.attach_canary(canary_id)?;
        self.deployments.save(&deployment).await?;

        let emitter = EventEmitter::new(self.bus.clone(), format!("canary-{}", canary_id));
        emitter
            .emit(DomainEvent::CanaryStarted {
                canary_id,
                deployment_id,
                initial_percent: config.initial_percent,
                meta: emitter.next_meta(None),
            })
            .await;

        let handle = CanaryHandle {
            state: Arc::new(RwLock::new(state)),
            cancel: CancellationToken::new(),
            abort_reason: Arc::new(Mutex::new(None)),
        };

        let run = CanaryRun {
            controller: self.clone(),
            state: handle.state.clone(),
            cancel: handle.cancel.clone(),
            abort_reason: handle.abort_reason.clone(),
            emitter,
            deployment,
            workload,
            update,
            new_image,
            config,
        };
        self.active.insert(canary_id, handle);

        info!(canary_id = %canary_id, deployment_id = %deployment_id, "started canary rollout");
        tokio::spawn(run.run());

        Ok(canary_id)
    }

    /// Abort an in-flight rollout. Terminal canaries cannot be aborted.
    pub async fn abort(&self, canary_id: CanaryId, reason: &str) -> Result<()> {
        let handle = self
            .active
            .get(&canary_id)
            .ok_or(DomainError::CanaryNotFound { canary_id })?;
        {
            let state = handle.state.read().await;
            if state.is_terminal() {
                return Err(DomainError::CanaryAlreadyTerminal {
                    canary_id,
                    phase: state.phase.to_string(),
                });
            }
        }
        *handle.abort_reason.lock() = Some(reason.to_string());
        handle.cancel.cancel();
        info!(canary_id = %canary_id, reason, "canary abort requested");
        Ok(())
    }

    /// Read-only snapshot of a canary's state.
    pub async fn status(&self, canary_id: CanaryId) -> Result<CanaryState> {
        let handle = self
            .active
            .get(&canary_id)
            .ok_or(DomainError::CanaryNotFound { canary_id })?;
        let state = handle.state.read().await.clone();
        Ok(state)
    }

    /// Wait until the canary reaches a terminal phase and return it.
    /// Intended for tests and synchronous callers; production flows
    /// observe the event stream instead.
    pub async fn wait_terminal(&self, canary_id: CanaryId) -> Result<CanaryState> {
        loop {
            let snapshot = self.status(canary_id).await?;
            if snapshot.is_terminal() {
                return Ok(snapshot);
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Everything one rollout task needs.
struct CanaryRun {
    controller: Arc<CanaryController>,
    state: Arc<RwLock<CanaryState>>,
    cancel: CancellationToken,
    abort_reason: Arc<Mutex<Option<String>>>,
    emitter: EventEmitter,
    deployment: Deployment,
    workload: Workload,
    update: UpdateParams,
    new_image: String,
    config: CanaryConfig,
}

/// Why a wait ended early.
enum WaitAbort {
    Cancelled,
    DeadlineReached,
}

impl CanaryRun {
    fn stable_name(&self) -> &str {
        &self.workload.name
    }

    fn canary_name(&self) -> String {
        format!("{}-canary", self.workload.name)
    }

    fn namespace(&self) -> &str {
        &self.deployment.namespace
    }

    async fn run(mut self) {
        let total = self.deployment.replicas.max(1);
        let deadline = Instant::now() + Duration::from_secs(self.config.max_duration_seconds);

        match self.drive(total, deadline).await {
            Ok(()) => {}
            Err(cause) => self.fail(total, cause).await,
        }
    }

    async fn drive(&mut self, total: i32, deadline: Instant) -> std::result::Result<(), String> {
        let canary_id = self.state.read().await.id;
        let namespace = self.namespace().to_string();
        let canary_name = self.canary_name();

        // Initializing: create the canary track, stable unchanged
        let canary_replicas = replicas_for_percent(total, self.config.initial_percent);
        let spec = self.canary_spec(canary_replicas);
        self.driver_create(&spec).await?;

        // Readiness gate on the fresh canary
        let score = self
            .sample_window(&canary_name, &namespace, canary_replicas, deadline)
            .await?;
        self.record_score(score).await;
        if score < self.config.min_health_score {
            return Err(format!(
                "canary failed readiness gate: score {:.2} below {:.2}",
                score, self.config.min_health_score
            ));
        }

        self.step_up(canary_id, self.config.initial_percent, score).await?;
        self.advance(CanaryPhase::DeployingCanary).await?;

        loop {
            // DeployingCanary: hold the step while sampling health
            let declared = {
                let state = self.state.read().await;
                replicas_for_percent(total, state.canary_percent)
            };
            let score = self
                .sample_window(&canary_name, &namespace, declared, deadline)
                .await?;
            self.record_score(score).await;
            self.advance(CanaryPhase::Analyzing).await?;

            // Analyzing: promote the step, finish, or abort on health
            if score < self.config.min_health_score {
                return Err(format!(
                    "health score {:.2} below minimum {:.2}",
                    score, self.config.min_health_score
                ));
            }

            let percent = self.state.read().await.canary_percent;
            if percent >= 100 {
                if self.config.auto_promote {
                    self.advance(CanaryPhase::Promoting).await?;
                    break;
                }
                // No auto-promote: hold at 100% until an abort arrives or
                // the duration ceiling forces failure.
                loop {
                    match self.wait(deadline, Duration::from_secs(60)).await {
                        Ok(()) => continue,
                        Err(WaitAbort::Cancelled) => return Err(self.abort_cause()),
                        Err(WaitAbort::DeadlineReached) => {
                            return Err(
                                "max duration reached awaiting manual promotion".to_string()
                            )
                        }
                    }
                }
            }

            let next = percent.saturating_add(self.config.increment_percent).min(100);
            let canary_replicas = replicas_for_percent(total, next);
            let stable_replicas = (total - canary_replicas).max(0);

            self.driver_scale(&canary_name, &namespace, canary_replicas).await?;
            self.driver_scale(&self.stable_name().to_string(), &namespace, stable_replicas)
                .await?;

            let score = self.state.read().await.last_health_score.unwrap_or(0.0);
            self.step_up(canary_id, next, score).await?;
            self.advance(CanaryPhase::DeployingCanary).await?;
        }

        // Promoting: replace the stable spec with the canary spec, then
        // remove the canary track. Stable-first ordering keeps stable
        // intact if anything fails in between.
        let mut patch = ResourcePatch::image(self.new_image.clone());
        patch.env = self.update.env.clone();
        self.driver_update(self.stable_name().to_string(), &namespace, patch).await?;
        self.driver_scale(&self.stable_name().to_string(), &namespace, total).await?;

        if let Err(error) = self
            .controller
            .driver
            .delete(ResourceKind::Deployment, &canary_name, &namespace, None)
            .await
        {
            return Err(format!(
                "orphaned_canary_requires_cleanup: stable promoted but canary removal failed: {}",
                error
            ));
        }

        // Pods of the promoted stable must come back ready
        let score = self
            .sample_window(self.stable_name(), &namespace, total, deadline)
            .await?;
        self.record_score(score).await;
        if score < self.config.min_health_score {
            return Err(format!(
                "promoted stable unhealthy: score {:.2} below {:.2}",
                score, self.config.min_health_score
            ));
        }

        // Persist the outcome and emit before the terminal phase becomes
        // observable, so a reader seeing `promoted` sees the whole effect.
        self.finish_deployment(true).await;
        self.emitter
            .emit(DomainEvent::CanaryPromoted {
                canary_id,
                deployment_id: self.deployment.id,
                meta: self.emitter.next_meta(None),
            })
            .await;
        self.advance(CanaryPhase::Promoted).await?;
        info!(canary_id = %canary_id, "canary promoted");
        Ok(())
    }

    /// Record one promoted step and emit the step event.
    async fn step_up(
        &self,
        canary_id: CanaryId,
        percent: u8,
        score: f64,
    ) -> std::result::Result<(), String> {
        let step = {
            let mut state = self.state.write().await;
            state.canary_percent = percent;
            state.step += 1;
            state.step
        };
        self.emitter
            .emit(DomainEvent::CanaryStepPromoted {
                canary_id,
                step,
                percent,
                score,
                meta: self.emitter.next_meta(None),
            })
            .await;
        Ok(())
    }

    /// Take `analysis_samples` health samples spaced one sample interval
    /// apart and return the step score: the mean of valid samples, with
    /// `Unknown` samples skipped and fewer than 2 valid samples scoring 0.
    async fn sample_window(
        &self,
        name: &str,
        namespace: &str,
        declared_replicas: i32,
        deadline: Instant,
    ) -> std::result::Result<f64, String> {
        let interval = Duration::from_secs(self.config.sample_interval_seconds());
        let mut scores = Vec::new();

        for _ in 0..self.config.analysis_samples {
            self.wait(deadline, interval).await.map_err(|abort| match abort {
                WaitAbort::Cancelled => self.abort_cause(),
                WaitAbort::DeadlineReached => "max duration reached".to_string(),
            })?;

            match self.controller.driver.list_pods(name, namespace).await {
                Ok(pods) => {
                    let report = evaluate_deployment_health(
                        declared_replicas,
                        &pods,
                        &self.controller.weights,
                        chrono::Utc::now(),
                    );
                    let canary_id = self.state.read().await.id;
                    self.emitter
                        .emit(DomainEvent::CanaryHealthSampled {
                            canary_id,
                            score: report.score,
                            status: report.status,
                            meta: self.emitter.next_meta(None),
                        })
                        .await;
                    if report.status != HealthStatus::Unknown {
                        scores.push(report.score);
                    }
                }
                Err(error) => {
                    // Transient faults were already retried inside the
                    // driver; skip the sample and keep the schedule.
                    warn!(%error, resource = name, "health sample failed");
                }
            }
        }

        if scores.len() < 2 {
            Ok(0.0)
        } else {
            Ok(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Cancellable wait that also races the rollout deadline.
    async fn wait(
        &self,
        deadline: Instant,
        duration: Duration,
    ) -> std::result::Result<(), WaitAbort> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(WaitAbort::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(WaitAbort::DeadlineReached),
            _ = sleep(duration) => Ok(()),
        }
    }

    fn abort_cause(&self) -> String {
        self.abort_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "manual abort".to_string())
    }

    async fn advance(&self, phase: CanaryPhase) -> std::result::Result<(), String> {
        let mut state = self.state.write().await;
        state
            .advance_phase(phase)
            .map_err(|e| format!("internal canary state error: {}", e))
    }

    async fn record_score(&self, score: f64) {
        self.state.write().await.record_score(score);
    }

    fn canary_spec(&self, replicas: i32) -> ResourceSpec {
        let mut labels = managed_labels(&self.workload.id.to_string());
        labels.insert(TRACK_LABEL.to_string(), "canary".to_string());

        let mut annotations = BTreeMap::new();
        annotations.insert(
            CANARY_ID_ANNOTATION.to_string(),
            self.deployment
                .active_canary_id
                .map(|c| c.to_string())
                .unwrap_or_default(),
        );

        let mut spec = ResourceSpec::new(self.canary_name(), self.namespace(), &self.new_image)
            .with_replicas(replicas)
            .with_labels(labels);
        spec.annotations = annotations;
        spec.env = self
            .update
            .env
            .clone()
            .unwrap_or_else(|| self.workload.env.clone());
        spec.cpu_millis = self.workload.resources.cpu_millis;
        spec.memory_bytes = self.workload.resources.memory_bytes;
        spec.gpu_count = self.workload.resources.gpu_count();
        spec
    }

    // Driver helpers that fold faults into abort causes --------------------

    async fn driver_create(&self, spec: &ResourceSpec) -> std::result::Result<(), String> {
        self.controller
            .driver
            .create(spec)
            .await
            .map(|_| ())
            .map_err(|e| format!("failed to create canary resource: {}", e))
    }

    async fn driver_scale(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> std::result::Result<(), String> {
        self.controller
            .driver
            .scale(name, namespace, replicas)
            .await
            .map(|_| ())
            .map_err(|e| format!("failed to scale {}: {}", name, e))
    }

    async fn driver_update(
        &self,
        name: String,
        namespace: &str,
        patch: ResourcePatch,
    ) -> std::result::Result<(), String> {
        self.controller
            .driver
            .update(&name, namespace, &patch)
            .await
            .map(|_| ())
            .map_err(|e| format!("failed to update {}: {}", name, e))
    }

    /// Terminal failure: tear the canary down, restore the stable track,
    /// emit the event, then record the terminal phase. Teardown comes
    /// first so a reader seeing `failed` sees the cluster restored.
    async fn fail(&mut self, total: i32, cause: String) {
        if self.config.abort_on_failure {
            let namespace = self.namespace().to_string();
            let canary_name = self.canary_name();
            match self
                .controller
                .driver
                .delete(ResourceKind::Deployment, &canary_name, &namespace, None)
                .await
            {
                Ok(()) => {}
                // NotFound is fine: the canary may never have been created
                Err(DriverError::NotFound { .. }) => {}
                Err(error) => warn!(%error, "failed to delete canary resource"),
            }
            if let Err(error) = self
                .controller
                .driver
                .scale(self.stable_name(), &namespace, total)
                .await
            {
                warn!(%error, "failed to restore stable replica count");
            }
        }
        self.finish_deployment(false).await;

        let (canary_id, last_score) = {
            let state = self.state.read().await;
            (state.id, state.last_health_score)
        };
        warn!(canary_id = %canary_id, %cause, "canary rollout failed");
        self.emitter
            .emit(DomainEvent::CanaryFailed {
                canary_id,
                deployment_id: self.deployment.id,
                last_score,
                cause: cause.clone(),
                meta: self.emitter.next_meta(None),
            })
            .await;

        let mut state = self.state.write().await;
        state.abort_reason = Some(cause);
        if let Err(error) = state.advance_phase(CanaryPhase::Failed) {
            error!(%error, "canary already terminal while failing");
        }
    }

    /// Release the deployment's canary slot once the rollout ends; a
    /// promoted rollout also carries the new image onto the workload.
    async fn finish_deployment(&self, promoted: bool) {
        match self.controller.deployments.get(self.deployment.id).await {
            Ok(Some(mut deployment)) => {
                deployment.detach_canary();
                if let Err(error) = self.controller.deployments.save(&deployment).await {
                    warn!(%error, "failed to persist deployment after canary completion");
                }
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "failed to load deployment after canary completion"),
        }

        if promoted {
            if let Ok(Some(mut workload)) =
                self.controller.workloads.get(self.workload.id).await
            {
                workload.set_image(&self.new_image);
                if let Err(error) = self.controller.workloads.save(&workload).await {
                    warn!(%error, "failed to persist workload image after promotion");
                }
            }
        }
    }
}

/// Replicas approximating `percent` of the total, at least one.
fn replicas_for_percent(total: i32, percent: u8) -> i32 {
    let total = total.max(1) as i64;
    let replicas = (total * percent as i64 + 99) / 100;
    replicas.max(1) as i32
}
