//! Kubernetes-backed cluster client.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::client::{ClusterClient, WatchEvent, WatchStream};
use crate::error::ClusterError;
use crate::objects::{
    ClusterEvent, ContainerState, ObjectReference, PodInfo, PodUsage, Termination, WorkloadInfo,
};
use crate::quantity::{parse_bytes, parse_cpu_millicores};
use crate::MANAGED_APP_SELECTOR;

/// Cluster client scoped to one namespace of a Kubernetes cluster.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connects using in-cluster config or the default kubeconfig.
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        Ok(Self::new(client, namespace))
    }

    /// Connects using an explicit kubeconfig file.
    pub async fn from_kubeconfig(
        path: &Path,
        namespace: impl Into<String>,
    ) -> Result<Self, ClusterError> {
        let kubeconfig =
            Kubeconfig::read_from(path).map_err(|e| ClusterError::Config(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| ClusterError::Config(e.to_string()))?;

        info!(kubeconfig = %path.display(), "Loaded kubeconfig");
        Ok(Self::new(client, namespace))
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn statefulsets(&self) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn events(&self) -> Api<Event> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pod_metrics(&self) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "pods");
        Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodInfo>, ClusterError> {
        let list = self
            .pods()
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items.iter().map(pod_info).collect())
    }

    async fn get_pod(&self, name: &str) -> Result<Option<PodInfo>, ClusterError> {
        Ok(self.pods().get_opt(name).await?.as_ref().map(pod_info))
    }

    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadInfo>, ClusterError> {
        Ok(self
            .statefulsets()
            .get_opt(name)
            .await?
            .as_ref()
            .map(workload_info))
    }

    async fn list_pod_events(&self, pod: &PodInfo) -> Result<Vec<ClusterEvent>, ClusterError> {
        let selector = ClusterEvent::field_selector_for(pod);
        let list = self
            .events()
            .list(&ListParams::default().fields(&selector))
            .await?;

        let mut events: Vec<_> = list.items.iter().map(cluster_event).collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn list_pod_usage(&self) -> Result<Vec<PodUsage>, ClusterError> {
        let list = self
            .pod_metrics()
            .list(&ListParams::default().labels(MANAGED_APP_SELECTOR))
            .await?;

        let usage: Vec<_> = list.items.iter().filter_map(pod_usage).collect();
        debug!(samples = usage.len(), "Listed pod usage");
        Ok(usage)
    }

    fn watch_pods(&self) -> WatchStream<PodInfo> {
        let config = watcher::Config::default().labels(MANAGED_APP_SELECTOR);
        watch(self.pods(), config, pod_info)
    }

    fn watch_workloads(&self) -> WatchStream<WorkloadInfo> {
        let config = watcher::Config::default().labels(MANAGED_APP_SELECTOR);
        watch(self.statefulsets(), config, workload_info)
    }

    fn watch_events(&self) -> WatchStream<ClusterEvent> {
        let config = watcher::Config::default().fields("involvedObject.kind=Pod");
        watch(self.events(), config, cluster_event)
    }
}

/// Runs a backed-off watcher and maps its objects through `convert`.
fn watch<K, T>(api: Api<K>, config: watcher::Config, convert: fn(&K) -> T) -> WatchStream<T>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    T: Send + 'static,
{
    watcher(api, config)
        .default_backoff()
        .map(move |event| match event {
            Ok(watcher::Event::Init) => Ok(WatchEvent::Init),
            Ok(watcher::Event::InitApply(obj)) => Ok(WatchEvent::InitApply(convert(&obj))),
            Ok(watcher::Event::InitDone) => Ok(WatchEvent::InitDone),
            Ok(watcher::Event::Apply(obj)) => Ok(WatchEvent::Apply(convert(&obj))),
            Ok(watcher::Event::Delete(obj)) => Ok(WatchEvent::Delete(convert(&obj))),
            Err(e) => Err(ClusterError::from(e)),
        })
        .boxed()
}

// =============================================================================
// Conversions
// =============================================================================

fn pod_info(pod: &Pod) -> PodInfo {
    let meta = &pod.metadata;
    let status = pod.status.as_ref();

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });

    let owner = meta
        .owner_references
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.kind == "StatefulSet"))
        .map(|r| r.name.clone());

    let container = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .map(|cs| ContainerState {
            restart_count: cs.restart_count,
            waiting_reason: cs
                .state
                .as_ref()
                .and_then(|s| s.waiting.as_ref())
                .and_then(|w| w.reason.clone()),
            last_termination: cs
                .last_state
                .as_ref()
                .and_then(|s| s.terminated.as_ref())
                .map(|t| Termination {
                    exit_code: t.exit_code,
                    reason: t.reason.clone(),
                    message: t.message.clone(),
                }),
        });

    let limits = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.resources.as_ref())
        .and_then(|r| r.limits.as_ref());
    let limit = |name: &str| {
        limits
            .and_then(|l| l.get(name))
            .and_then(|q| parse_bytes(&q.0))
    };

    PodInfo {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        owner,
        ip: status.and_then(|s| s.pod_ip.clone()).filter(|ip| !ip.is_empty()),
        ready,
        terminating: meta.deletion_timestamp.is_some(),
        container,
        memory_limit_bytes: limit("memory"),
        disk_limit_bytes: limit("ephemeral-storage"),
        created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
    }
}

fn workload_info(statefulset: &StatefulSet) -> WorkloadInfo {
    let meta = &statefulset.metadata;
    let spec = statefulset.spec.as_ref();

    WorkloadInfo {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        replicas: spec
            .and_then(|s| s.replicas)
            .map(|r| r.max(0) as u32)
            .unwrap_or(1),
        selector: spec
            .and_then(|s| s.selector.match_labels.clone())
            .unwrap_or_default(),
    }
}

fn cluster_event(event: &Event) -> ClusterEvent {
    let involved = &event.involved_object;
    let timestamp = event
        .last_timestamp
        .as_ref()
        .or(event.first_timestamp.as_ref())
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0));

    ClusterEvent {
        name: event.metadata.name.clone().unwrap_or_default(),
        namespace: event.metadata.namespace.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        involved: ObjectReference {
            kind: involved.kind.clone().unwrap_or_default(),
            name: involved.name.clone().unwrap_or_default(),
            namespace: involved.namespace.clone().unwrap_or_default(),
            uid: involved.uid.clone().unwrap_or_default(),
        },
        count: event.count.unwrap_or(1),
        timestamp,
    }
}

fn pod_usage(metrics: &DynamicObject) -> Option<PodUsage> {
    let pod_name = metrics.metadata.name.clone()?;
    let containers = metrics.data.get("containers")?.as_array()?;

    let mut usage = PodUsage {
        pod_name,
        ..Default::default()
    };
    for container in containers {
        let Some(sample) = container.get("usage") else {
            continue;
        };
        if let Some(cpu) = sample.get("cpu").and_then(|v| v.as_str()) {
            usage.cpu_millicores += parse_cpu_millicores(cpu).unwrap_or(0.0);
        }
        if let Some(memory) = sample.get("memory").and_then(|v| v.as_str()) {
            usage.memory_bytes += parse_bytes(memory).unwrap_or(0);
        }
    }

    Some(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerStateTerminated, ContainerStateWaiting, ContainerStatus, PodCondition, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    #[test]
    fn test_pod_info_conversion() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("odin-v1-2".to_string()),
                namespace: Some("apps".to_string()),
                uid: Some("uid-2".to_string()),
                owner_references: Some(vec![OwnerReference {
                    kind: "StatefulSet".to_string(),
                    name: "odin-v1".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.7".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                container_statuses: Some(vec![ContainerStatus {
                    restart_count: 2,
                    state: Some(k8s_openapi::api::core::v1::ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("CrashLoopBackOff".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    last_state: Some(k8s_openapi::api::core::v1::ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code: 137,
                            reason: Some("OOMKilled".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = pod_info(&pod);
        assert_eq!(info.name, "odin-v1-2");
        assert_eq!(info.owner.as_deref(), Some("odin-v1"));
        assert!(info.is_routable());
        assert_eq!(info.index(), Some(2));

        let container = info.container.unwrap();
        assert_eq!(container.restart_count, 2);
        assert_eq!(container.waiting_reason.as_deref(), Some("CrashLoopBackOff"));
        assert_eq!(container.last_termination.unwrap().exit_code, 137);
    }

    #[test]
    fn test_pod_without_status_is_not_routable() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("odin-v1-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let info = pod_info(&pod);
        assert!(info.ip.is_none());
        assert!(!info.is_routable());
    }

    #[test]
    fn test_pod_usage_sums_containers() {
        let metrics: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "metrics.k8s.io/v1beta1",
            "kind": "PodMetrics",
            "metadata": { "name": "odin-v1-0" },
            "containers": [
                { "name": "app", "usage": { "cpu": "250m", "memory": "64Mi" } },
                { "name": "sidecar", "usage": { "cpu": "50m", "memory": "1Mi" } }
            ]
        }))
        .unwrap();

        let usage = pod_usage(&metrics).unwrap();
        assert_eq!(usage.pod_name, "odin-v1-0");
        assert_eq!(usage.cpu_millicores, 300.0);
        assert_eq!(usage.memory_bytes, 65 * 1024 * 1024);
    }
}
