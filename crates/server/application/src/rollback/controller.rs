//! Automatic rollback on sustained degradation.
//!
//! One monitor loop per registered deployment scores its pods every
//! check interval. A configured number of consecutive bad scores
//! triggers exactly one rollback through the driver, followed by a
//! cooldown during which no further rollback is issued. The loop never
//! holds a lock across a driver call.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

use artzain_server_domain::driver::ClusterDriver;
use artzain_server_domain::event_bus::EventBus;
use artzain_server_domain::events::DomainEvent;
use artzain_server_domain::health::{evaluate_deployment_health, HealthStatus, HealthWeights};
use artzain_server_domain::repository::{DeploymentRepository, WorkloadRepository};
use artzain_server_domain::rollback::{RollbackConfig, RollbackReason, RollbackRecord};
use artzain_server_domain::shared_kernel::{DeploymentId, DomainError, Result};
use tokio_util::sync::CancellationToken;

use crate::emitter::EventEmitter;

struct MonitorHandle {
    cancel: CancellationToken,
}

/// Background monitor that reverts deployments on sustained bad health.
pub struct RollbackController {
    driver: Arc<dyn ClusterDriver>,
    workloads: Arc<dyn WorkloadRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    bus: Arc<dyn EventBus>,
    weights: HealthWeights,
    defaults: RollbackConfig,
    monitors: DashMap<DeploymentId, MonitorHandle>,
    records: Mutex<Vec<RollbackRecord>>,
}

impl RollbackController {
    pub fn new(
        driver: Arc<dyn ClusterDriver>,
        workloads: Arc<dyn WorkloadRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        bus: Arc<dyn EventBus>,
        weights: HealthWeights,
        defaults: RollbackConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            workloads,
            deployments,
            bus,
            weights,
            defaults,
            monitors: DashMap::new(),
            records: Mutex::new(Vec::new()),
        })
    }

    /// Register a deployment for monitoring. Re-registering replaces the
    /// previous monitor and its configuration.
    pub async fn register(
        self: &Arc<Self>,
        deployment_id: DeploymentId,
        config: Option<RollbackConfig>,
    ) -> Result<()> {
        let deployment = self
            .deployments
            .get(deployment_id)
            .await?
            .ok_or(DomainError::DeploymentNotFound { deployment_id })?;
        if deployment.is_terminal() {
            return Err(DomainError::InvalidInput {
                field: "deployment_id".to_string(),
                reason: format!("deployment is terminal ({})", deployment.status),
            });
        }

        self.unregister(deployment_id);

        let config = config.unwrap_or_else(|| self.defaults.clone());
        let cancel = CancellationToken::new();
        self.monitors
            .insert(deployment_id, MonitorHandle { cancel: cancel.clone() });

        let controller = self.clone();
        info!(
            deployment_id = %deployment_id,
            min_health = config.min_health_score,
            interval = config.check_interval_seconds,
            "registered deployment for rollback monitoring"
        );
        tokio::spawn(async move {
            controller.monitor_loop(deployment_id, config, cancel).await;
        });
        Ok(())
    }

    /// Stop monitoring a deployment. Returns true when a monitor existed.
    pub fn unregister(&self, deployment_id: DeploymentId) -> bool {
        if let Some((_, handle)) = self.monitors.remove(&deployment_id) {
            handle.cancel.cancel();
            info!(deployment_id = %deployment_id, "unregistered rollback monitor");
            true
        } else {
            false
        }
    }

    pub fn monitored_count(&self) -> usize {
        self.monitors.len()
    }

    /// Rollback history accumulated by this controller instance.
    pub fn records(&self) -> Vec<RollbackRecord> {
        self.records.lock().clone()
    }

    /// Manually trigger a rollback, bypassing the health counters.
    pub async fn trigger(
        &self,
        deployment_id: DeploymentId,
        reason: RollbackReason,
        to_revision: Option<i64>,
        triggered_by: &str,
    ) -> Result<RollbackRecord> {
        let emitter = EventEmitter::new(self.bus.clone(), format!("rollback-{}", deployment_id));
        self.execute_rollback(&emitter, deployment_id, reason, to_revision, triggered_by, None)
            .await
    }

    async fn monitor_loop(
        self: Arc<Self>,
        deployment_id: DeploymentId,
        config: RollbackConfig,
        cancel: CancellationToken,
    ) {
        let emitter = EventEmitter::new(self.bus.clone(), format!("rollback-{}", deployment_id));
        let interval = Duration::from_secs(config.check_interval_seconds);
        let mut bad_count: u32 = 0;
        let mut cooldown_until: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(interval) => {}
            }

            if let Some(until) = cooldown_until {
                if Instant::now() < until {
                    continue;
                }
                cooldown_until = None;
            }

            let score = match self.check_once(deployment_id).await {
                Ok(CheckOutcome::Score(score)) => score,
                Ok(CheckOutcome::SkipUnknown) => continue,
                Ok(CheckOutcome::Terminal) => {
                    info!(deployment_id = %deployment_id, "deployment terminal, stopping monitor");
                    self.monitors.remove(&deployment_id);
                    return;
                }
                Err(error) => {
                    // Monitor failures are logged; the loop continues with
                    // the next interval.
                    warn!(deployment_id = %deployment_id, %error, "rollback health check failed");
                    continue;
                }
            };

            if score < config.min_health_score {
                bad_count += 1;
                warn!(
                    deployment_id = %deployment_id,
                    score,
                    bad_count,
                    threshold = config.consecutive_bad_threshold,
                    "health below rollback threshold"
                );
            } else {
                bad_count = 0;
            }

            if bad_count >= config.consecutive_bad_threshold {
                bad_count = 0;
                cooldown_until =
                    Some(Instant::now() + Duration::from_secs(config.cooldown_seconds));
                if let Err(error) = self
                    .execute_rollback(
                        &emitter,
                        deployment_id,
                        RollbackReason::HealthScoreBelowThreshold,
                        config.target_revision,
                        "rollback-controller",
                        Some(score),
                    )
                    .await
                {
                    warn!(deployment_id = %deployment_id, %error, "automatic rollback failed");
                }
            }
        }
    }

    /// One health check. No lock is held while the driver call runs.
    async fn check_once(&self, deployment_id: DeploymentId) -> Result<CheckOutcome> {
        let deployment = self
            .deployments
            .get(deployment_id)
            .await?
            .ok_or(DomainError::DeploymentNotFound { deployment_id })?;
        if deployment.is_terminal() {
            return Ok(CheckOutcome::Terminal);
        }

        let workload = self
            .workloads
            .get(deployment.workload_id)
            .await?
            .ok_or(DomainError::WorkloadNotFound {
                workload_id: deployment.workload_id,
            })?;

        let pods = self
            .driver
            .list_pods(&workload.name, &deployment.namespace)
            .await?;
        let report = evaluate_deployment_health(
            deployment.replicas,
            &pods,
            &self.weights,
            chrono::Utc::now(),
        );

        // Nothing observed yet: not a degradation signal
        if report.status == HealthStatus::Unknown {
            return Ok(CheckOutcome::SkipUnknown);
        }
        Ok(CheckOutcome::Score(report.score))
    }

    async fn execute_rollback(
        &self,
        emitter: &EventEmitter,
        deployment_id: DeploymentId,
        reason: RollbackReason,
        to_revision: Option<i64>,
        triggered_by: &str,
        score: Option<f64>,
    ) -> Result<RollbackRecord> {
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

        emitter
            .emit(DomainEvent::DeploymentRollbackTriggered {
                deployment_id,
                reason,
                score,
                meta: emitter.next_meta(None),
            })
            .await;
        info!(
            deployment_id = %deployment_id,
            %reason,
            ?to_revision,
            triggered_by,
            "rolling back deployment"
        );

        let from_revision = self
            .driver
            .get(
                artzain_server_domain::driver::ResourceKind::Deployment,
                &workload.name,
                &deployment.namespace,
            )
            .await
            .ok()
            .flatten()
            .map(|r| r.revision);

        let state = self
            .driver
            .rollback(&workload.name, &deployment.namespace, to_revision)
            .await?;

        let record = RollbackRecord::new(deployment_id, reason, triggered_by)
            .with_revisions(from_revision, Some(state.revision));
        self.records.lock().push(record.clone());

        // The deployment keeps serving on the reverted revision; status
        // transitions to rolled_back belong to explicit delete/rollback
        // decisions driven by the plan executor.
        deployment.updated_at = chrono::Utc::now();
        if let Err(error) = self.deployments.save(&deployment).await {
            warn!(%error, "failed to persist deployment after rollback");
        }

        emitter
            .emit(DomainEvent::DeploymentRolledBack {
                deployment_id,
                record: record.clone(),
                meta: emitter.next_meta(None),
            })
            .await;

        Ok(record)
    }
}

enum CheckOutcome {
    Score(f64),
    SkipUnknown,
    Terminal,
}
