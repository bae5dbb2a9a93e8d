//! Workload deletion and route annotation changes.

use std::sync::Arc;

use async_trait::async_trait;
use tether_cluster::{ClusterClient, PodInfo, WorkloadInfo};
use tether_events::RouteMessage;
use tether_reconcile::diff_sets;
use tracing::{debug, info, warn};

use super::{Change, ChangeHandler};
use crate::routing::{route_messages, RouteAction};

/// Pods owned by `workload`, listed through its selector.
async fn owned_pods(
    client: &dyn ClusterClient,
    workload: &WorkloadInfo,
) -> Result<Vec<PodInfo>, tether_cluster::ClusterError> {
    if workload.selector.is_empty() {
        return Ok(Vec::new());
    }

    let pods = client.list_pods(&workload.pod_selector()).await?;
    Ok(pods
        .into_iter()
        .filter(|p| p.owner.as_deref() == Some(workload.name.as_str()))
        .collect())
}

// =============================================================================
// Delete
// =============================================================================

/// Unregisters every addressed pod of a deleted workload.
pub struct StatefulSetDeleteHandler {
    client: Arc<dyn ClusterClient>,
}

impl StatefulSetDeleteHandler {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    async fn on_delete(&self, workload: &WorkloadInfo) -> Vec<RouteMessage> {
        let routes = match workload.routes() {
            Ok(routes) => routes,
            Err(e) => {
                warn!(workload = %workload.name, error = %e, "Malformed route annotation");
                return Vec::new();
            }
        };
        if routes.is_empty() {
            return Vec::new();
        }

        let pods = match owned_pods(self.client.as_ref(), workload).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(workload = %workload.name, error = %e, "Failed to list pods of deleted workload");
                return Vec::new();
            }
        };

        let messages: Vec<_> = pods
            .iter()
            .flat_map(|pod| route_messages(pod, &routes, RouteAction::Unregister))
            .collect();

        info!(
            workload = %workload.name,
            pods = pods.len(),
            messages = messages.len(),
            "Workload deleted"
        );
        messages
    }
}

#[async_trait]
impl ChangeHandler<WorkloadInfo> for StatefulSetDeleteHandler {
    type Output = RouteMessage;

    fn name(&self) -> &'static str {
        "statefulset-delete"
    }

    async fn handle(&self, change: &Change<WorkloadInfo>) -> Vec<RouteMessage> {
        match change {
            Change::Deleted(workload) => self.on_delete(workload).await,
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Annotation update
// =============================================================================

/// Moves routable pods of a workload to a changed route annotation.
pub struct UriAnnotationUpdateHandler {
    client: Arc<dyn ClusterClient>,
}

impl UriAnnotationUpdateHandler {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    async fn on_update(&self, old: &WorkloadInfo, new: &WorkloadInfo) -> Vec<RouteMessage> {
        if old.routes_raw() == new.routes_raw() {
            return Vec::new();
        }

        let new_routes = match new.routes() {
            Ok(routes) => routes,
            Err(e) => {
                warn!(workload = %new.name, error = %e, "Malformed route annotation");
                return Vec::new();
            }
        };
        let old_routes = old.routes().unwrap_or_else(|e| {
            warn!(workload = %old.name, error = %e, "Previous route annotation was malformed");
            Vec::new()
        });

        let diff = diff_sets(&old_routes, &new_routes);
        if diff.is_empty() {
            return Vec::new();
        }

        let pods = match owned_pods(self.client.as_ref(), new).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(workload = %new.name, error = %e, "Failed to list pods of updated workload");
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for pod in pods.iter().filter(|p| p.is_routable()) {
            messages.extend(route_messages(pod, &diff.removed, RouteAction::Unregister));
            messages.extend(route_messages(pod, &diff.added, RouteAction::Register));
        }

        debug!(
            workload = %new.name,
            added = diff.added.len(),
            removed = diff.removed.len(),
            messages = messages.len(),
            "Route annotation changed"
        );
        messages
    }
}

#[async_trait]
impl ChangeHandler<WorkloadInfo> for UriAnnotationUpdateHandler {
    type Output = RouteMessage;

    fn name(&self) -> &'static str {
        "uri-annotation-update"
    }

    async fn handle(&self, change: &Change<WorkloadInfo>) -> Vec<RouteMessage> {
        match change {
            Change::Updated { old, new } => self.on_update(old, new).await,
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Composite
// =============================================================================

/// Runs both workload handlers against one workload watch.
pub struct WorkloadHandler {
    delete: StatefulSetDeleteHandler,
    update: UriAnnotationUpdateHandler,
}

impl WorkloadHandler {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            delete: StatefulSetDeleteHandler::new(Arc::clone(&client)),
            update: UriAnnotationUpdateHandler::new(client),
        }
    }
}

#[async_trait]
impl ChangeHandler<WorkloadInfo> for WorkloadHandler {
    type Output = RouteMessage;

    fn name(&self) -> &'static str {
        "workload"
    }

    async fn handle(&self, change: &Change<WorkloadInfo>) -> Vec<RouteMessage> {
        let mut messages = self.delete.handle(change).await;
        messages.extend(self.update.handle(change).await);
        messages
    }
}
