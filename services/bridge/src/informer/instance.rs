//! Pod readiness transitions.

use std::sync::Arc;

use async_trait::async_trait;
use tether_cluster::{ClusterClient, PodInfo};
use tether_events::RouteMessage;
use tracing::{debug, warn};

use super::{Change, ChangeHandler};
use crate::routing::{route_messages, RouteAction};

/// Registers instances that become routable and unregisters instances that
/// stop being routable (not ready, being deleted, or gone).
///
/// Unregistration always uses the previous pod's address.
pub struct InstanceChangeHandler {
    client: Arc<dyn ClusterClient>,
}

impl InstanceChangeHandler {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    async fn messages(&self, pod: &PodInfo, action: RouteAction) -> Vec<RouteMessage> {
        if !pod.is_managed_app() {
            return Vec::new();
        }
        let Some(owner) = pod.owner.as_deref() else {
            debug!(pod = %pod.name, "Pod has no owner workload");
            return Vec::new();
        };

        let workload = match self.client.get_workload(owner).await {
            Ok(Some(workload)) => workload,
            Ok(None) => {
                debug!(pod = %pod.name, workload = %owner, "Owner workload is gone");
                return Vec::new();
            }
            Err(e) => {
                warn!(pod = %pod.name, workload = %owner, error = %e, "Failed to get owner workload");
                return Vec::new();
            }
        };

        match workload.routes() {
            Ok(routes) => route_messages(pod, &routes, action),
            Err(e) => {
                warn!(workload = %owner, error = %e, "Malformed route annotation");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ChangeHandler<PodInfo> for InstanceChangeHandler {
    type Output = RouteMessage;

    fn name(&self) -> &'static str {
        "instance"
    }

    async fn handle(&self, change: &Change<PodInfo>) -> Vec<RouteMessage> {
        match change {
            Change::Added(pod) if pod.is_routable() => {
                self.messages(pod, RouteAction::Register).await
            }
            Change::Added(_) => Vec::new(),
            Change::Updated { old, new } => match (old.is_routable(), new.is_routable()) {
                (true, false) => {
                    debug!(pod = %old.name, "Instance stopped being routable");
                    self.messages(old, RouteAction::Unregister).await
                }
                (false, true) => {
                    debug!(pod = %new.name, "Instance became routable");
                    self.messages(new, RouteAction::Register).await
                }
                (true, true) if old.ip != new.ip => {
                    let mut messages = self.messages(old, RouteAction::Unregister).await;
                    messages.extend(self.messages(new, RouteAction::Register).await);
                    messages
                }
                _ => Vec::new(),
            },
            Change::Deleted(pod) if pod.is_routable() => {
                self.messages(pod, RouteAction::Unregister).await
            }
            Change::Deleted(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_lrp::Desirer;
    use tether_testing::{lrp, FakeCluster};

    const ROUTES: &str = r#"[{"hostname":"foo.example.com","port":8080}]"#;

    async fn setup() -> (Arc<FakeCluster>, InstanceChangeHandler) {
        let cluster = Arc::new(FakeCluster::new("apps"));
        cluster.desire(&lrp("odin", "v1", 1, Some(ROUTES))).await.unwrap();
        let handler = InstanceChangeHandler::new(cluster.clone());
        (cluster, handler)
    }

    #[tokio::test]
    async fn test_not_ready_unregisters_old_address() {
        let (cluster, handler) = setup().await;
        let old = cluster.pod("odin-v1-0").unwrap();
        let new = PodInfo {
            ready: false,
            ..old.clone()
        };

        let messages = handler.handle(&Change::Updated { old, new }).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].address, "10.0.0.5");
        assert_eq!(messages[0].routes.unregistered_routes, vec!["foo.example.com"]);
        assert!(messages[0].routes.registered_routes.is_empty());
    }

    #[tokio::test]
    async fn test_becoming_ready_registers() {
        let (cluster, handler) = setup().await;
        let new = cluster.pod("odin-v1-0").unwrap();
        let old = PodInfo {
            ready: false,
            ip: None,
            ..new.clone()
        };

        let messages = handler.handle(&Change::Updated { old, new }).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].routes.registered_routes, vec!["foo.example.com"]);
    }

    #[tokio::test]
    async fn test_unchanged_readiness_is_silent() {
        let (cluster, handler) = setup().await;
        let pod = cluster.pod("odin-v1-0").unwrap();

        let change = Change::Updated {
            old: pod.clone(),
            new: pod,
        };
        assert!(handler.handle(&change).await.is_empty());
    }

    #[tokio::test]
    async fn test_deleting_unroutable_pod_is_silent() {
        let (cluster, handler) = setup().await;
        let pod = PodInfo {
            terminating: true,
            ..cluster.pod("odin-v1-0").unwrap()
        };
        assert!(handler.handle(&Change::Deleted(pod)).await.is_empty());
    }

    #[tokio::test]
    async fn test_address_change_moves_routes() {
        let (cluster, handler) = setup().await;
        let old = cluster.pod("odin-v1-0").unwrap();
        let new = PodInfo {
            ip: Some("10.0.0.99".to_string()),
            ..old.clone()
        };

        let messages = handler.handle(&Change::Updated { old, new }).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].address, "10.0.0.5");
        assert!(!messages[0].routes.unregistered_routes.is_empty());
        assert_eq!(messages[1].address, "10.0.0.99");
        assert!(!messages[1].routes.registered_routes.is_empty());
    }
}
