//! Periodic route collection.
//!
//! The collector rebuilds the full set of route registrations from a fresh pod
//! listing on every run. It does not diff: redundant registrations on every
//! poll are what keep router tables alive.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tether_cluster::{ClusterClient, ClusterError, MANAGED_APP_SELECTOR};
use tether_events::RouteMessage;
use tether_lrp::Route;
use tether_reconcile::TaskScheduler;
use tracing::{debug, info, warn};

use crate::emitter::RouteEmitter;
use crate::routing::{route_messages, RouteAction};

/// Builds registration messages for every routable instance.
pub struct RouteCollector {
    client: Arc<dyn ClusterClient>,
}

impl RouteCollector {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Lists managed pods and returns one register message per (pod, port).
    ///
    /// A listing error fails the whole call. Pods without an address, not ready,
    /// being deleted, without an owner or with a malformed route annotation are
    /// skipped.
    pub async fn collect(&self) -> Result<Vec<RouteMessage>, ClusterError> {
        let mut pods = self.client.list_pods(MANAGED_APP_SELECTOR).await?;
        pods.sort_by(|a, b| a.name.cmp(&b.name));

        let mut routes_by_workload: HashMap<String, Option<Vec<Route>>> = HashMap::new();
        let mut messages = Vec::new();

        for pod in &pods {
            if !pod.is_routable() {
                debug!(pod = %pod.name, ready = pod.ready, "Skipping unroutable pod");
                continue;
            }

            let Some(owner) = pod.owner.as_deref() else {
                debug!(pod = %pod.name, "Skipping pod without owner");
                continue;
            };

            if !routes_by_workload.contains_key(owner) {
                let routes = self.workload_routes(owner).await?;
                routes_by_workload.insert(owner.to_string(), routes);
            }

            if let Some(Some(routes)) = routes_by_workload.get(owner) {
                messages.extend(route_messages(pod, routes, RouteAction::Register));
            }
        }

        debug!(
            pods = pods.len(),
            messages = messages.len(),
            "Collected routes"
        );
        Ok(messages)
    }

    async fn workload_routes(&self, name: &str) -> Result<Option<Vec<Route>>, ClusterError> {
        let Some(workload) = self.client.get_workload(name).await? else {
            debug!(workload = %name, "Owner workload not found");
            return Ok(None);
        };

        match workload.routes() {
            Ok(routes) => Ok(Some(routes)),
            Err(e) => {
                warn!(workload = %name, error = %e, "Malformed route annotation");
                Ok(None)
            }
        }
    }
}

/// Runs collect-then-emit on a scheduler.
pub struct CollectorScheduler<S> {
    collector: Arc<RouteCollector>,
    emitter: Arc<RouteEmitter>,
    scheduler: S,
}

impl<S: TaskScheduler> CollectorScheduler<S> {
    pub fn new(collector: Arc<RouteCollector>, emitter: Arc<RouteEmitter>, scheduler: S) -> Self {
        Self {
            collector,
            emitter,
            scheduler,
        }
    }

    /// Arms the collect-and-emit task.
    pub fn start(&self) {
        info!("Starting route collector");

        let collector = Arc::clone(&self.collector);
        let emitter = Arc::clone(&self.emitter);
        self.scheduler.schedule("route-collector", move || {
            let collector = Arc::clone(&collector);
            let emitter = Arc::clone(&emitter);
            async move {
                let messages = collector.collect().await.context("collecting routes")?;
                emitter.emit(&messages).await.context("emitting routes")?;
                anyhow::Ok(())
            }
        });
    }

    /// Returns the underlying scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}
