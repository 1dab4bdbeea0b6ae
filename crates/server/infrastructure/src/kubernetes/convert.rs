//! Conversions between Kubernetes objects and driver types.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;

use artzain_server_domain::driver::{
    ContainerSnapshot, DriverError, PodPhase, PodSnapshot, ResourceKind, ResourceState,
};

use super::factory::REVISION_ANNOTATION;

pub fn deployment_to_state(deployment: &Deployment) -> ResourceState {
    let metadata = &deployment.metadata;
    let spec_replicas = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let image = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    ResourceState {
        name: metadata.name.clone().unwrap_or_default(),
        namespace: metadata.namespace.clone().unwrap_or_default(),
        kind: ResourceKind::Deployment,
        replicas: spec_replicas,
        ready_replicas: ready,
        labels: metadata.labels.clone().unwrap_or_default(),
        annotations: metadata.annotations.clone().unwrap_or_default(),
        revision: revision_of(metadata.annotations.as_ref()),
        image,
        created_at: metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}

pub fn job_to_state(job: &Job) -> ResourceState {
    let metadata = &job.metadata;
    let parallelism = job.spec.as_ref().and_then(|s| s.parallelism).unwrap_or(1);
    let ready = job.status.as_ref().and_then(|s| s.ready).unwrap_or(0);
    let image = job
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    ResourceState {
        name: metadata.name.clone().unwrap_or_default(),
        namespace: metadata.namespace.clone().unwrap_or_default(),
        kind: ResourceKind::Job,
        replicas: parallelism,
        ready_replicas: ready,
        labels: metadata.labels.clone().unwrap_or_default(),
        annotations: metadata.annotations.clone().unwrap_or_default(),
        revision: revision_of(metadata.annotations.as_ref()),
        image,
        created_at: metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}

pub fn stateful_set_to_state(set: &StatefulSet) -> ResourceState {
    let metadata = &set.metadata;
    let replicas = set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let ready = set
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let image = set
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    ResourceState {
        name: metadata.name.clone().unwrap_or_default(),
        namespace: metadata.namespace.clone().unwrap_or_default(),
        kind: ResourceKind::StatefulSet,
        replicas,
        ready_replicas: ready,
        labels: metadata.labels.clone().unwrap_or_default(),
        annotations: metadata.annotations.clone().unwrap_or_default(),
        revision: revision_of(metadata.annotations.as_ref()),
        image,
        created_at: metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}

fn revision_of(annotations: Option<&BTreeMap<String, String>>) -> i64 {
    annotations
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

pub fn pod_to_snapshot(pod: &Pod) -> PodSnapshot {
    let status = pod.status.as_ref();

    let phase = match status.and_then(|s| s.phase.as_deref()) {
        Some("Pending") => PodPhase::Pending,
        Some("Running") => PodPhase::Running,
        Some("Succeeded") => PodPhase::Succeeded,
        Some("Failed") => PodPhase::Failed,
        _ => PodPhase::Unknown,
    };

    let containers: Vec<ContainerSnapshot> = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| ContainerSnapshot {
                    name: cs.name.clone(),
                    ready: cs.ready,
                    waiting_reason: cs
                        .state
                        .as_ref()
                        .and_then(|state| state.waiting.as_ref())
                        .and_then(|w| w.reason.clone()),
                })
                .collect()
        })
        .unwrap_or_default();

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or_else(|| !containers.is_empty() && containers.iter().all(|c| c.ready));

    let restart_count = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|cs| cs.restart_count.max(0) as u32).sum())
        .unwrap_or(0);

    PodSnapshot {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase,
        ready,
        restart_count,
        created_at: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        containers,
    }
}

/// Fold a kube error into the typed driver fault set.
pub fn map_kube_error(error: kube::Error, name: &str, namespace: &str) -> DriverError {
    match &error {
        kube::Error::Api(response) => match response.code {
            404 => DriverError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            409 => DriverError::AlreadyExists {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            400 | 422 => DriverError::Invalid {
                message: response.message.clone(),
            },
            408 | 504 => DriverError::Timeout {
                message: response.message.clone(),
            },
            _ => DriverError::Unavailable {
                message: response.message.clone(),
            },
        },
        other => DriverError::Unavailable {
            message: other.to_string(),
        },
    }
}
