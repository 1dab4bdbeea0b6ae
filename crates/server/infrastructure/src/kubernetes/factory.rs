//! Construction of Kubernetes objects from driver specs.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use artzain_server_domain::driver::ResourceSpec;

/// Label every pod of a managed resource carries, used to select pods
/// for health snapshots.
pub const APP_LABEL: &str = "app";

/// Annotation tracking the driver-maintained revision counter.
pub const REVISION_ANNOTATION: &str = "artzain.io/revision";

/// Annotation prefix for per-revision image history entries.
pub const HISTORY_ANNOTATION_PREFIX: &str = "artzain.io/history-";

/// History entries kept before old revisions are pruned.
pub const HISTORY_LIMIT: i64 = 10;

/// Build a typed apps/v1 Deployment from a driver spec.
///
/// The selector matches on the app label only, so label-only updates
/// never orphan the replica set.
pub fn build_deployment(spec: &ResourceSpec, labels: BTreeMap<String, String>) -> Deployment {
    let mut pod_labels = labels.clone();
    pod_labels.insert(APP_LABEL.to_string(), spec.name.clone());

    let mut selector = BTreeMap::new();
    selector.insert(APP_LABEL.to_string(), spec.name.clone());

    let mut annotations = spec.annotations.clone();
    annotations.insert(REVISION_ANNOTATION.to_string(), "1".to_string());
    annotations.insert(
        format!("{}{}", HISTORY_ANNOTATION_PREFIX, 1),
        spec.image.clone(),
    );

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some({
                let mut all = labels;
                all.insert(APP_LABEL.to_string(), spec.name.clone());
                all
            }),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: pod_template(spec, pod_labels, None),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build a typed batch/v1 Job from a driver spec. The replica count
/// maps to parallelism.
pub fn build_job(spec: &ResourceSpec, labels: BTreeMap<String, String>) -> Job {
    let mut pod_labels = labels.clone();
    pod_labels.insert(APP_LABEL.to_string(), spec.name.clone());

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some({
                let mut all = labels;
                all.insert(APP_LABEL.to_string(), spec.name.clone());
                all
            }),
            annotations: Some(spec.annotations.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            parallelism: Some(spec.replicas.max(1)),
            template: pod_template(spec, pod_labels, Some("Never")),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build a typed apps/v1 StatefulSet from a driver spec.
pub fn build_stateful_set(spec: &ResourceSpec, labels: BTreeMap<String, String>) -> StatefulSet {
    let mut pod_labels = labels.clone();
    pod_labels.insert(APP_LABEL.to_string(), spec.name.clone());

    let mut selector = BTreeMap::new();
    selector.insert(APP_LABEL.to_string(), spec.name.clone());

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some({
                let mut all = labels;
                all.insert(APP_LABEL.to_string(), spec.name.clone());
                all
            }),
            annotations: Some(spec.annotations.clone()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(spec.replicas),
            service_name: spec.name.clone(),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: pod_template(spec, pod_labels, None),
            ..Default::default()
        }),
        status: None,
    }
}

fn pod_template(
    spec: &ResourceSpec,
    pod_labels: BTreeMap<String, String>,
    restart_policy: Option<&str>,
) -> PodTemplateSpec {
    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: spec.name.clone(),
                image: Some(spec.image.clone()),
                env: if env.is_empty() { None } else { Some(env) },
                resources: build_resources(spec),
                ..Default::default()
            }],
            restart_policy: restart_policy.map(String::from),
            ..Default::default()
        }),
    }
}

fn build_resources(spec: &ResourceSpec) -> Option<ResourceRequirements> {
    if spec.cpu_millis == 0 && spec.memory_bytes == 0 && spec.gpu_count == 0 {
        return None;
    }

    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();

    if spec.cpu_millis > 0 {
        requests.insert("cpu".to_string(), Quantity(format!("{}m", spec.cpu_millis)));
    }
    if spec.memory_bytes > 0 {
        requests.insert("memory".to_string(), Quantity(spec.memory_bytes.to_string()));
    }
    if spec.gpu_count > 0 {
        let quantity = Quantity(spec.gpu_count.to_string());
        requests.insert("nvidia.com/gpu".to_string(), quantity.clone());
        limits.insert("nvidia.com/gpu".to_string(), quantity);
    }

    Some(ResourceRequirements {
        requests: Some(requests),
        limits: if limits.is_empty() { None } else { Some(limits) },
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use artzain_server_domain::driver::managed_labels;

    fn spec() -> ResourceSpec {
        let mut spec = ResourceSpec::new("bert-serving", "ml", "registry/bert:2")
            .with_replicas(4)
            .with_labels(managed_labels("wl-1"));
        spec.cpu_millis = 2000;
        spec.memory_bytes = 4 * 1024 * 1024 * 1024;
        spec.gpu_count = 1;
        spec
    }

    #[test]
    fn test_build_deployment_shape() {
        let deployment = build_deployment(&spec(), managed_labels("wl-1"));
        let metadata = &deployment.metadata;
        assert_eq!(metadata.name.as_deref(), Some("bert-serving"));

        let labels = metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("managed-by").unwrap(), "artzain");
        assert_eq!(labels.get(APP_LABEL).unwrap(), "bert-serving");

        let annotations = metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations.get(REVISION_ANNOTATION).unwrap(), "1");
        assert_eq!(
            annotations.get("artzain.io/history-1").unwrap(),
            "registry/bert:2"
        );

        let dspec = deployment.spec.as_ref().unwrap();
        assert_eq!(dspec.replicas, Some(4));
        let container = &dspec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("registry/bert:2"));
        let requests = container
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests.get("cpu").unwrap().0, "2000m");
        assert_eq!(requests.get("nvidia.com/gpu").unwrap().0, "1");
    }

    #[test]
    fn test_selector_matches_pod_labels() {
        let deployment = build_deployment(&spec(), managed_labels("wl-1"));
        let dspec = deployment.spec.as_ref().unwrap();
        let selector = dspec.selector.match_labels.as_ref().unwrap();
        let pod_labels = dspec
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .as_ref()
            .unwrap();
        for (k, v) in selector {
            assert_eq!(pod_labels.get(k), Some(v));
        }
    }
}
