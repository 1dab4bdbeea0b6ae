//! Cluster driver backed by the Kubernetes API.
//!
//! Implements the domain `ClusterDriver` port with kube-rs. Transient
//! faults (API unavailability, timeouts) are retried with exponential
//! backoff before surfacing; permanent faults surface immediately.
//!
//! Revision tracking for rollback is driver-maintained: every create and
//! image update bumps a revision annotation and records the image in a
//! bounded per-revision history, which `rollback` reads back.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use artzain_server_domain::driver::{
    ClusterDriver, DriverError, DriverResult, PodSnapshot, ResourceKind, ResourcePatch,
    ResourceSpec, ResourceState, RetryPolicy, WatchEvent, COMPONENT_LABEL, COMPONENT_VALUE,
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, MAX_REPLICAS, WORKLOAD_ID_LABEL,
};

use super::convert::{
    deployment_to_state, job_to_state, map_kube_error, pod_to_snapshot, stateful_set_to_state,
};
use super::factory::{
    build_deployment, build_job, build_stateful_set, APP_LABEL, HISTORY_ANNOTATION_PREFIX,
    HISTORY_LIMIT, REVISION_ANNOTATION,
};
use super::watch::spawn_watch;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Kubernetes-backed implementation of the cluster driver port.
#[derive(Clone)]
pub struct KubernetesDriver {
    client: Client,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
}

impl KubernetesDriver {
    /// Connect using the ambient kube configuration (kubeconfig or
    /// in-cluster service account).
    pub async fn connect() -> DriverResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| DriverError::Unavailable {
                message: format!("failed to build kube client: {}", e),
            })?;
        info!("kubernetes driver connected");
        Ok(Self::new(client))
    }

    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry_policy: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn stateful_sets(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Run one API operation under the request timeout, retrying
    /// transient faults per the backoff policy.
    async fn with_retry<T, F, Fut>(
        &self,
        name: &str,
        namespace: &str,
        mut operation: F,
    ) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, kube::Error>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let error = match timeout(self.request_timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => map_kube_error(e, name, namespace),
                Err(_) => DriverError::Timeout {
                    message: format!("request for {}/{} timed out", namespace, name),
                },
            };

            if error.is_transient() && self.retry_policy.should_retry(attempt) {
                let delay = self.retry_policy.delay_for_attempt(attempt);
                warn!(
                    resource = name,
                    namespace,
                    attempt,
                    ?delay,
                    %error,
                    "transient driver fault, retrying"
                );
                sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Err(error);
        }
    }

    /// Labels every managed resource carries, merged over the caller's.
    fn managed_label_set(spec: &ResourceSpec) -> BTreeMap<String, String> {
        let mut labels = spec.labels.clone();
        labels.insert(COMPONENT_LABEL.to_string(), COMPONENT_VALUE.to_string());
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        labels
            .entry(WORKLOAD_ID_LABEL.to_string())
            .or_insert_with(|| spec.name.clone());
        labels
    }

    /// Annotation patch advancing the revision counter and recording the
    /// new image, pruning history entries beyond the limit.
    fn revision_annotations(current: &ResourceState, new_image: &str) -> Value {
        let next = current.revision + 1;
        let mut annotations = serde_json::Map::new();
        annotations.insert(REVISION_ANNOTATION.to_string(), json!(next.to_string()));
        annotations.insert(
            format!("{}{}", HISTORY_ANNOTATION_PREFIX, next),
            json!(new_image),
        );
        let stale = next - HISTORY_LIMIT;
        if stale >= 1 {
            annotations.insert(
                format!("{}{}", HISTORY_ANNOTATION_PREFIX, stale),
                Value::Null,
            );
        }
        Value::Object(annotations)
    }
}

#[async_trait]
impl ClusterDriver for KubernetesDriver {
    async fn create(&self, spec: &ResourceSpec) -> DriverResult<ResourceState> {
        let labels = Self::managed_label_set(spec);

        let result = match spec.kind {
            ResourceKind::Deployment => {
                let api = self.deployments(&spec.namespace);
                let object = build_deployment(spec, labels);
                self.with_retry(&spec.name, &spec.namespace, || {
                    let api = api.clone();
                    let object = object.clone();
                    async move { api.create(&PostParams::default(), &object).await }
                })
                .await
                .map(|d| deployment_to_state(&d))
            }
            ResourceKind::Job => {
                let api = self.jobs(&spec.namespace);
                let object = build_job(spec, labels);
                self.with_retry(&spec.name, &spec.namespace, || {
                    let api = api.clone();
                    let object = object.clone();
                    async move { api.create(&PostParams::default(), &object).await }
                })
                .await
                .map(|j| job_to_state(&j))
            }
            ResourceKind::StatefulSet => {
                let api = self.stateful_sets(&spec.namespace);
                let object = build_stateful_set(spec, labels);
                self.with_retry(&spec.name, &spec.namespace, || {
                    let api = api.clone();
                    let object = object.clone();
                    async move { api.create(&PostParams::default(), &object).await }
                })
                .await
                .map(|s| stateful_set_to_state(&s))
            }
        };

        match result {
            Ok(state) => {
                info!(resource = %spec.name, namespace = %spec.namespace, "created resource");
                Ok(state)
            }
            // Idempotent on (name, namespace) when the existing resource
            // is ours; foreign resources surface AlreadyExists.
            Err(DriverError::AlreadyExists { .. }) => {
                let existing = self.get(spec.kind, &spec.name, &spec.namespace).await?;
                match existing {
                    Some(state) if state.is_managed() => {
                        debug!(resource = %spec.name, "create was idempotent");
                        Ok(state)
                    }
                    _ => Err(DriverError::AlreadyExists {
                        namespace: spec.namespace.clone(),
                        name: spec.name.clone(),
                    }),
                }
            }
            Err(error) => Err(error),
        }
    }

    async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> DriverResult<Option<ResourceState>> {
        match kind {
            ResourceKind::Deployment => {
                let api = self.deployments(namespace);
                let found = self
                    .with_retry(name, namespace, || {
                        let api = api.clone();
                        let name = name.to_string();
                        async move { api.get_opt(&name).await }
                    })
                    .await?;
                Ok(found.map(|d| deployment_to_state(&d)))
            }
            ResourceKind::Job => {
                let api = self.jobs(namespace);
                let found = self
                    .with_retry(name, namespace, || {
                        let api = api.clone();
                        let name = name.to_string();
                        async move { api.get_opt(&name).await }
                    })
                    .await?;
                Ok(found.map(|j| job_to_state(&j)))
            }
            ResourceKind::StatefulSet => {
                let api = self.stateful_sets(namespace);
                let found = self
                    .with_retry(name, namespace, || {
                        let api = api.clone();
                        let name = name.to_string();
                        async move { api.get_opt(&name).await }
                    })
                    .await?;
                Ok(found.map(|s| stateful_set_to_state(&s)))
            }
        }
    }

    async fn scale(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> DriverResult<ResourceState> {
        if replicas < 0 {
            return Err(DriverError::Invalid {
                message: format!("replica count must not be negative, got {}", replicas),
            });
        }
        if replicas > MAX_REPLICAS {
            return Err(DriverError::Invalid {
                message: format!(
                    "replica count {} above the {} ceiling",
                    replicas, MAX_REPLICAS
                ),
            });
        }

        let api = self.deployments(namespace);
        let patch = json!({"spec": {"replicas": replicas}});
        let updated = self
            .with_retry(name, namespace, || {
                let api = api.clone();
                let name = name.to_string();
                let patch = patch.clone();
                async move {
                    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                        .await
                }
            })
            .await?;
        info!(resource = name, namespace, replicas, "scaled resource");
        Ok(deployment_to_state(&updated))
    }

    async fn update(
        &self,
        name: &str,
        namespace: &str,
        patch: &ResourcePatch,
    ) -> DriverResult<ResourceState> {
        if patch.is_empty() {
            return Err(DriverError::Invalid {
                message: "empty patch".to_string(),
            });
        }

        let current = self
            .get(ResourceKind::Deployment, name, namespace)
            .await?
            .ok_or_else(|| DriverError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let mut metadata = serde_json::Map::new();
        if let Some(labels) = &patch.labels {
            // Strategic merge; the managed-by label is never patchable
            let filtered: BTreeMap<&String, &String> = labels
                .iter()
                .filter(|(k, _)| k.as_str() != MANAGED_BY_LABEL)
                .collect();
            metadata.insert("labels".to_string(), json!(filtered));
        }
        let mut annotations = match &patch.annotations {
            Some(extra) => json!(extra).as_object().cloned().unwrap_or_default(),
            None => serde_json::Map::new(),
        };
        if let Some(image) = &patch.image {
            if let Value::Object(revision) = Self::revision_annotations(&current, image) {
                annotations.extend(revision);
            }
        }
        if !annotations.is_empty() {
            metadata.insert("annotations".to_string(), Value::Object(annotations));
        }

        let mut spec = serde_json::Map::new();
        if let Some(replicas) = patch.replicas {
            if !(0..=MAX_REPLICAS).contains(&replicas) {
                return Err(DriverError::Invalid {
                    message: format!("replica count {} out of range", replicas),
                });
            }
            spec.insert("replicas".to_string(), json!(replicas));
        }
        if patch.image.is_some() || patch.env.is_some() {
            let mut container = serde_json::Map::new();
            container.insert("name".to_string(), json!(name));
            if let Some(image) = &patch.image {
                container.insert("image".to_string(), json!(image));
            }
            if let Some(env) = &patch.env {
                let env: Vec<Value> = env
                    .iter()
                    .map(|(k, v)| json!({"name": k, "value": v}))
                    .collect();
                container.insert("env".to_string(), Value::Array(env));
            }
            spec.insert(
                "template".to_string(),
                json!({"spec": {"containers": [Value::Object(container)]}}),
            );
        }

        let mut body = serde_json::Map::new();
        if !metadata.is_empty() {
            body.insert("metadata".to_string(), Value::Object(metadata));
        }
        if !spec.is_empty() {
            body.insert("spec".to_string(), Value::Object(spec));
        }
        let body = Value::Object(body);

        let api = self.deployments(namespace);
        let updated = self
            .with_retry(name, namespace, || {
                let api = api.clone();
                let name = name.to_string();
                let body = body.clone();
                async move {
                    api.patch(&name, &PatchParams::default(), &Patch::Strategic(&body))
                        .await
                }
            })
            .await?;
        info!(resource = name, namespace, "updated resource");
        Ok(deployment_to_state(&updated))
    }

    async fn rollback(
        &self,
        name: &str,
        namespace: &str,
        to_revision: Option<i64>,
    ) -> DriverResult<ResourceState> {
        let current = self
            .get(ResourceKind::Deployment, name, namespace)
            .await?
            .ok_or_else(|| DriverError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let target = to_revision.unwrap_or(current.revision - 1);
        if target < 1 {
            return Err(DriverError::NoPreviousRevision {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        let image = current
            .annotations
            .get(&format!("{}{}", HISTORY_ANNOTATION_PREFIX, target))
            .cloned()
            .ok_or_else(|| DriverError::NoPreviousRevision {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        info!(
            resource = name,
            namespace,
            from_revision = current.revision,
            to_revision = target,
            image = %image,
            "rolling back resource"
        );
        self.update(name, namespace, &ResourcePatch::image(image)).await
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
        grace_seconds: Option<u32>,
    ) -> DriverResult<()> {
        let params = DeleteParams {
            grace_period_seconds: grace_seconds,
            ..Default::default()
        };

        match kind {
            ResourceKind::Deployment => {
                let api = self.deployments(namespace);
                self.with_retry(name, namespace, || {
                    let api = api.clone();
                    let name = name.to_string();
                    let params = params.clone();
                    async move { api.delete(&name, &params).await }
                })
                .await?;
            }
            ResourceKind::Job => {
                let api = self.jobs(namespace);
                self.with_retry(name, namespace, || {
                    let api = api.clone();
                    let name = name.to_string();
                    let params = params.clone();
                    async move { api.delete(&name, &params).await }
                })
                .await?;
            }
            ResourceKind::StatefulSet => {
                let api = self.stateful_sets(namespace);
                self.with_retry(name, namespace, || {
                    let api = api.clone();
                    let name = name.to_string();
                    let params = params.clone();
                    async move { api.delete(&name, &params).await }
                })
                .await?;
            }
        }
        info!(resource = name, namespace, "deleted resource");
        Ok(())
    }

    async fn list_pods(&self, name: &str, namespace: &str) -> DriverResult<Vec<PodSnapshot>> {
        let api = self.pods(namespace);
        let selector = format!("{}={}", APP_LABEL, name);
        let pods = self
            .with_retry(name, namespace, || {
                let api = api.clone();
                let params = ListParams::default().labels(&selector);
                async move { api.list(&params).await }
            })
            .await?;
        Ok(pods.items.iter().map(pod_to_snapshot).collect())
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<String>,
    ) -> DriverResult<BoxStream<'static, DriverResult<WatchEvent>>> {
        let (tx, rx) = mpsc::channel(64);
        spawn_watch(
            self.client.clone(),
            kind,
            namespace.to_string(),
            label_selector,
            self.retry_policy,
            tx,
        );
        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }
}
