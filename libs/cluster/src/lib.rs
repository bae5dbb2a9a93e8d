//! # tether-cluster
//!
//! Read-only views of the orchestrator objects the bridge observes, and the
//! [`ClusterClient`] capability used to list and watch them.
//!
//! ## Objects
//!
//! - [`PodInfo`]: one running instance (address, readiness, container state)
//! - [`WorkloadInfo`]: the StatefulSet backing one LRP (route annotation, replicas)
//! - [`ClusterEvent`]: a lifecycle event recorded against a pod
//!
//! ## Clients
//!
//! - [`KubeCluster`]: Kubernetes API via `kube`
//! - test doubles live in `tether-testing`
//!
//! The client is shared read-only between the collector and every informer and
//! is passed explicitly at construction.

mod client;
mod error;
mod kubernetes;
mod objects;
pub mod quantity;

pub use client::{list_instances, ClusterClient, WatchEvent, WatchStream};
pub use error::ClusterError;
pub use kubernetes::KubeCluster;
pub use objects::*;

/// Labels set on every managed workload and pod.
pub mod labels {
    pub const GUID: &str = "guid";
    pub const VERSION: &str = "version";
    pub const SOURCE_TYPE: &str = "source_type";

    /// `source_type` value of app instances.
    pub const APP_SOURCE_TYPE: &str = "APP";
}

/// Annotations set on managed workloads.
pub mod annotations {
    pub use tether_lrp::metadata::{PROCESS_GUID, ROUTES};
}

/// Label selector matching all managed app pods.
pub const MANAGED_APP_SELECTOR: &str = "source_type=APP";

/// Event reasons recorded by the kubelet.
pub mod reasons {
    pub const BACK_OFF: &str = "BackOff";
    pub const KILLING: &str = "Killing";
    pub const OOM_KILLING: &str = "OOMKilling";
    pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";
}
