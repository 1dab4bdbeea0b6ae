//! Cluster driver port.
//!
//! The uniform surface over a single target cluster. The kube-backed
//! implementation lives in the infrastructure layer; tests drive the core
//! through an in-process fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Label identifying resources created by this controller.
pub const MANAGED_BY_LABEL: &str = "managed-by";
/// Value of the managed-by label for resources we own.
pub const MANAGED_BY_VALUE: &str = "artzain";
/// Component label injected on every managed resource.
pub const COMPONENT_LABEL: &str = "component";
/// Value of the component label.
pub const COMPONENT_VALUE: &str = "workload-controller";
/// Label carrying the owning workload id.
pub const WORKLOAD_ID_LABEL: &str = "workload-id";

/// Replica counts above this are refused as absurd.
pub const MAX_REPLICAS: i32 = 10_000;

/// Typed driver faults.
///
/// `Unavailable` and `Timeout` are transient: the driver retries them
/// internally per its backoff policy before surfacing them. Everything
/// else is permanent and returned immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Resource not found: {namespace}/{name}")]
    NotFound { namespace: String, name: String },

    #[error("Resource already exists and is not managed by this controller: {namespace}/{name}")]
    AlreadyExists { namespace: String, name: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Cluster unavailable: {message}")]
    Unavailable { message: String },

    #[error("Cluster request timed out: {message}")]
    Timeout { message: String },

    #[error("No previous revision to roll back to: {namespace}/{name}")]
    NoPreviousRevision { namespace: String, name: String },
}

impl DriverError {
    /// Transient faults are retried by the driver; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Unavailable { .. } | DriverError::Timeout { .. })
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Resource kinds the driver manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Deployment,
    Job,
    StatefulSet,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Job => "Job",
            ResourceKind::StatefulSet => "StatefulSet",
        };
        write!(f, "{}", s)
    }
}

/// Desired state handed to `create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub namespace: String,
    pub kind: ResourceKind,
    pub image: String,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    /// CPU request in millicores
    pub cpu_millis: u64,
    /// Memory request in bytes
    pub memory_bytes: u64,
    /// GPU count, zero when none
    pub gpu_count: u32,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            kind: ResourceKind::Deployment,
            image: image.into(),
            replicas: 1,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            env: BTreeMap::new(),
            cpu_millis: 0,
            memory_bytes: 0,
            gpu_count: 0,
        }
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// Observed state of a managed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub name: String,
    pub namespace: String,
    pub kind: ResourceKind,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Revision counter maintained by the driver (monotonic per resource)
    pub revision: i64,
    pub image: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl ResourceState {
    pub fn is_managed(&self) -> bool {
        self.labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE)
    }
}

/// Strategic-merge-style patch for `update`.
///
/// Absent fields are untouched. The driver never lets a patch change the
/// managed-by label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePatch {
    pub image: Option<String>,
    pub replicas: Option<i32>,
    pub env: Option<BTreeMap<String, String>>,
    pub labels: Option<BTreeMap<String, String>>,
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ResourcePatch {
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Default::default()
        }
    }

    pub fn annotation(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(key.into(), value.into());
        Self {
            annotations: Some(annotations),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_none()
            && self.replicas.is_none()
            && self.env.is_none()
            && self.labels.is_none()
            && self.annotations.is_none()
    }
}

/// Pod phase as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Container-level snapshot within a pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub name: String,
    pub ready: bool,
    /// Waiting reason (CrashLoopBackOff, ImagePullBackOff, ...), when waiting
    pub waiting_reason: Option<String>,
}

/// Point-in-time view of one pod, as consumed by the health evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub name: String,
    pub phase: PodPhase,
    pub ready: bool,
    pub restart_count: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub containers: Vec<ContainerSnapshot>,
}

impl PodSnapshot {
    /// Convenience constructor for a ready, running pod.
    pub fn ready(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: PodPhase::Running,
            ready: true,
            restart_count: 0,
            created_at: None,
            containers: Vec::new(),
        }
    }
}

/// Watch event types, Kubernetes style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// One event from a watch stream.
///
/// Per-object ordering is preserved across stream restarts; cross-object
/// ordering is not guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Retry policy for transient driver faults.
///
/// Exponential backoff with a deterministic jitter derived from the
/// attempt number, so retry schedules stay reproducible in tests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Returns the delay for a specific attempt number (1-indexed).
    ///
    /// `initial_delay * multiplier^(attempt-1)` capped at `max_delay`,
    /// with deterministic pseudo-jitter keyed on the attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }

        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powf(attempt as f64 - 1.0);
        let delay = delay.min(self.max_delay.as_secs_f64());

        let pseudo_jitter = 1.0 + ((attempt % 10) as f64 / 10.0 - 0.5) * 2.0 * self.jitter_factor;
        let delay = delay * pseudo_jitter;

        Duration::from_secs_f64(delay.max(self.initial_delay.as_secs_f64()))
    }

    /// Returns true if another attempt should be made after `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Uniform typed interface to a single cluster.
///
/// All methods are suspension points: network I/O suspends the calling
/// worker, never the process. Transient faults are retried internally per
/// the driver's `RetryPolicy`; permanent faults surface unchanged.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Create a resource. Idempotent on `(name, namespace)` when the
    /// existing resource is managed by this controller; fails with
    /// `AlreadyExists` when a foreign resource holds the name.
    async fn create(&self, spec: &ResourceSpec) -> DriverResult<ResourceState>;

    /// Fetch a resource, `None` when absent.
    async fn get(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> DriverResult<Option<ResourceState>>;

    /// Scale a resource. Refuses negative or absurd (> 10 000) counts.
    async fn scale(&self, name: &str, namespace: &str, replicas: i32)
        -> DriverResult<ResourceState>;

    /// Apply a strategic-merge patch. Never touches managed-by labels.
    async fn update(
        &self,
        name: &str,
        namespace: &str,
        patch: &ResourcePatch,
    ) -> DriverResult<ResourceState>;

    /// Revert to `to_revision`, or to the previous managed revision when
    /// omitted. Fails with `NoPreviousRevision` when none exists.
    async fn rollback(
        &self,
        name: &str,
        namespace: &str,
        to_revision: Option<i64>,
    ) -> DriverResult<ResourceState>;

    /// Delete a resource with an optional grace period.
    async fn delete(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
        grace_seconds: Option<u32>,
    ) -> DriverResult<()>;

    /// Snapshot the pods backing a named resource.
    async fn list_pods(&self, name: &str, namespace: &str) -> DriverResult<Vec<PodSnapshot>>;

    /// Watch resources of a kind. The stream restarts transparently with
    /// backoff on termination, preserving per-object ordering.
    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<String>,
    ) -> DriverResult<BoxStream<'static, DriverResult<WatchEvent>>>;
}

/// The labels injected on every resource this controller creates.
pub fn managed_labels(workload_id: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(COMPONENT_LABEL.to_string(), COMPONENT_VALUE.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(WORKLOAD_ID_LABEL.to_string(), workload_id.to_string());
    labels
}
