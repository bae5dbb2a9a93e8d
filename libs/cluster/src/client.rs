//! The cluster client capability.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tether_lrp::Instance;

use crate::error::ClusterError;
use crate::objects::{instance_state, ClusterEvent, PodInfo, PodUsage, WorkloadInfo};

/// A raw watch event.
///
/// A (re)list is delivered as `Init`, one `InitApply` per existing object,
/// then `InitDone`; afterwards changes arrive as `Apply`/`Delete`.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Init,
    InitApply(T),
    InitDone,
    Apply(T),
    Delete(T),
}

/// A watch stream over one object kind.
pub type WatchStream<T> = BoxStream<'static, Result<WatchEvent<T>, ClusterError>>;

/// Read-only access to the managed namespace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Namespace every call is scoped to.
    fn namespace(&self) -> &str;

    /// Lists pods matching a label selector.
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodInfo>, ClusterError>;

    /// Returns a pod by name.
    async fn get_pod(&self, name: &str) -> Result<Option<PodInfo>, ClusterError>;

    /// Returns a workload by name.
    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadInfo>, ClusterError>;

    /// Lists events whose involved object is `pod`, oldest first.
    ///
    /// Events are matched on namespace, name and uid, so a replacement pod
    /// that reuses a name does not inherit its predecessor's history.
    async fn list_pod_events(&self, pod: &PodInfo) -> Result<Vec<ClusterEvent>, ClusterError>;

    /// Lists current resource usage of managed pods.
    async fn list_pod_usage(&self) -> Result<Vec<PodUsage>, ClusterError>;

    /// Watches managed pods.
    fn watch_pods(&self) -> WatchStream<PodInfo>;

    /// Watches managed workloads.
    fn watch_workloads(&self) -> WatchStream<WorkloadInfo>;

    /// Watches events recorded against pods.
    fn watch_events(&self) -> WatchStream<ClusterEvent>;
}

/// Builds the instance view of `pods` for a desirer.
///
/// Pods without an index suffix are skipped; the result is ordered by index.
pub async fn list_instances<C>(client: &C, pods: &[PodInfo]) -> Result<Vec<Instance>, ClusterError>
where
    C: ClusterClient + ?Sized,
{
    let mut instances = Vec::with_capacity(pods.len());
    for pod in pods {
        let Some(index) = pod.index() else {
            continue;
        };
        let events = client.list_pod_events(pod).await?;
        instances.push(Instance {
            index,
            state: instance_state(pod, &events),
            since: pod
                .created_at
                .and_then(|t| t.timestamp_nanos_opt())
                .unwrap_or_default(),
        });
    }
    instances.sort_by_key(|i| i.index);
    Ok(instances)
}
