//! Restartable watch streams.
//!
//! A watch task lists to obtain a resource version, opens a watch, and
//! forwards events into a channel. On stream termination (resource
//! version expiry, disconnects, API errors) it restarts
//! transparently with backoff. Per-object event ordering is preserved
//! because there is exactly one task per stream.

use std::fmt::Debug;

use chrono::Utc;
use futures::TryStreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, WatchEvent as KubeWatchEvent, WatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use artzain_server_domain::driver::{
    DriverResult, ResourceKind, RetryPolicy, WatchEvent, WatchEventType,
};

/// Spawn the watch task for a resource kind.
pub(super) fn spawn_watch(
    client: Client,
    kind: ResourceKind,
    namespace: String,
    selector: Option<String>,
    policy: RetryPolicy,
    tx: mpsc::Sender<DriverResult<WatchEvent>>,
) {
    match kind {
        ResourceKind::Deployment => {
            tokio::spawn(watch_loop::<Deployment>(client, kind, namespace, selector, policy, tx));
        }
        ResourceKind::Job => {
            tokio::spawn(watch_loop::<Job>(client, kind, namespace, selector, policy, tx));
        }
        ResourceKind::StatefulSet => {
            tokio::spawn(watch_loop::<StatefulSet>(client, kind, namespace, selector, policy, tx));
        }
    }
}

async fn watch_loop<K>(
    client: Client,
    kind: ResourceKind,
    namespace: String,
    selector: Option<String>,
    policy: RetryPolicy,
    tx: mpsc::Sender<DriverResult<WatchEvent>>,
) where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client, &namespace);
    let mut failures: u32 = 0;

    loop {
        if failures > 0 {
            let delay = policy.delay_for_attempt(failures.min(policy.max_attempts));
            debug!(?delay, failures, "watch restarting after backoff");
            sleep(delay).await;
        }

        let mut list_params = ListParams::default();
        if let Some(selector) = &selector {
            list_params = list_params.labels(selector);
        }
        let initial = match api.list(&list_params).await {
            Ok(list) => list,
            Err(error) => {
                warn!(%error, namespace = %namespace, "watch list failed");
                failures = failures.saturating_add(1);
                continue;
            }
        };
        let version = initial.metadata.resource_version.unwrap_or_default();

        let mut watch_params = WatchParams::default();
        if let Some(selector) = &selector {
            watch_params = watch_params.labels(selector);
        }
        let stream = match api.watch(&watch_params, &version).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, namespace = %namespace, "watch open failed");
                failures = failures.saturating_add(1);
                continue;
            }
        };
        futures::pin_mut!(stream);

        loop {
            match stream.try_next().await {
                Ok(Some(KubeWatchEvent::Added(object))) => {
                    failures = 0;
                    if forward(&tx, kind, &namespace, WatchEventType::Added, &object)
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(Some(KubeWatchEvent::Modified(object))) => {
                    failures = 0;
                    if forward(&tx, kind, &namespace, WatchEventType::Modified, &object)
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(Some(KubeWatchEvent::Deleted(object))) => {
                    failures = 0;
                    if forward(&tx, kind, &namespace, WatchEventType::Deleted, &object)
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(Some(KubeWatchEvent::Bookmark(_))) => {}
                Ok(Some(KubeWatchEvent::Error(response))) => {
                    if response.code == 410 {
                        debug!("watch resource version expired, relisting");
                    } else {
                        warn!(code = response.code, message = %response.message, "watch error event");
                        failures = failures.saturating_add(1);
                    }
                    break;
                }
                Ok(None) => {
                    debug!("watch stream ended, restarting");
                    break;
                }
                Err(error) => {
                    warn!(%error, "watch stream failed, restarting");
                    failures = failures.saturating_add(1);
                    break;
                }
            }
        }
    }
}

async fn forward<K>(
    tx: &mpsc::Sender<DriverResult<WatchEvent>>,
    kind: ResourceKind,
    namespace: &str,
    event_type: WatchEventType,
    object: &K,
) -> Result<(), ()>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    let event = WatchEvent {
        event_type,
        kind,
        name: object.name_any(),
        namespace: object
            .namespace()
            .unwrap_or_else(|| namespace.to_string()),
        labels: object.labels().clone(),
        timestamp: Utc::now(),
    };
    tx.send(Ok(event)).await.map_err(|_| ())
}
