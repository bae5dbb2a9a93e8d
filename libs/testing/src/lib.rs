//! Test support for tether.
//!
//! [`FakeCluster`] is an in-memory orchestrator. It implements both
//! [`ClusterClient`](tether_cluster::ClusterClient) and
//! [`Desirer`](tether_lrp::Desirer), so a test can desire LRPs and observe the
//! watch events a StatefulSet controller would produce.

mod fake;

pub use fake::{FakeCluster, WatchKind};

use tether_lrp::{Healthcheck, Lrp, LrpIdentifier};

/// Builds an LRP with `instances` replicas and the given route annotation.
pub fn lrp(guid: &str, version: &str, instances: u32, routes: Option<&str>) -> Lrp {
    let mut metadata = std::collections::BTreeMap::new();
    if let Some(routes) = routes {
        metadata.insert(tether_lrp::metadata::ROUTES.to_string(), routes.to_string());
    }

    Lrp {
        identifier: LrpIdentifier::new(guid, version),
        app_name: guid.to_string(),
        space_name: "space".to_string(),
        image: "busybox".to_string(),
        command: vec![],
        env: Default::default(),
        target_instances: instances,
        memory_mb: 256,
        disk_mb: 1024,
        health: Healthcheck::default(),
        metadata,
    }
}
