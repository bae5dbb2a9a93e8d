//! Orchestrator object views.
//!
//! These are the fields the bridge actually reads, decoupled from the
//! orchestrator's API types so handlers can be tested without a cluster.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tether_id::{instance_index, LrpIdentifier, ProcessGuid};
use tether_lrp::{parse_routes, InstanceState, Route, RouteError};

use crate::{annotations, labels, reasons};

/// Objects that can be cached by name.
pub trait ClusterObject: Clone + Send + Sync + 'static {
    /// Cache key; unique within the namespace.
    fn key(&self) -> &str;
}

/// Builds a `k=v,k2=v2` label selector.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Pods
// =============================================================================

/// Last termination of a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Termination {
    pub exit_code: i32,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// State of the app container of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerState {
    pub restart_count: i32,
    /// Set while the container is waiting (e.g. `CrashLoopBackOff`).
    pub waiting_reason: Option<String>,
    pub last_termination: Option<Termination>,
}

/// One running instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    /// Name of the owning workload.
    pub owner: Option<String>,
    /// Assigned address; `None` until scheduled.
    pub ip: Option<String>,
    pub ready: bool,
    /// Deletion has been requested.
    pub terminating: bool,
    pub container: Option<ContainerState>,
    pub memory_limit_bytes: Option<u64>,
    pub disk_limit_bytes: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PodInfo {
    /// Ready, addressed and not being deleted.
    pub fn is_routable(&self) -> bool {
        self.ready && !self.terminating && self.ip.as_deref().is_some_and(|ip| !ip.is_empty())
    }

    /// Carries the managed app label.
    pub fn is_managed_app(&self) -> bool {
        self.labels.get(labels::SOURCE_TYPE).map(String::as_str) == Some(labels::APP_SOURCE_TYPE)
    }

    /// App GUID from the `guid` label.
    pub fn app_guid(&self) -> Option<&str> {
        self.labels.get(labels::GUID).map(String::as_str)
    }

    /// Process GUID built from the `guid` and `version` labels.
    pub fn process_guid(&self) -> Option<ProcessGuid> {
        let guid = self.labels.get(labels::GUID)?;
        let version = self.labels.get(labels::VERSION)?;
        Some(LrpIdentifier::new(guid.as_str(), version.as_str()).process_guid())
    }

    /// Instance index parsed from the pod name.
    pub fn index(&self) -> Option<u32> {
        instance_index(&self.name).ok()
    }
}

impl ClusterObject for PodInfo {
    fn key(&self) -> &str {
        &self.name
    }
}

/// Derives the reported state of an instance from its pod and events.
pub fn instance_state(pod: &PodInfo, events: &[ClusterEvent]) -> InstanceState {
    let waiting = pod
        .container
        .as_ref()
        .and_then(|c| c.waiting_reason.as_deref());
    if waiting == Some(reasons::CRASH_LOOP_BACK_OFF) {
        return InstanceState::Crashed;
    }

    if let Some(last) = events.last() {
        if last.reason == reasons::BACK_OFF || last.reason == reasons::OOM_KILLING {
            return InstanceState::Crashed;
        }
    }

    if pod.terminating {
        return InstanceState::Unknown;
    }

    if pod.ready {
        InstanceState::Running
    } else {
        InstanceState::Starting
    }
}

// =============================================================================
// Workloads
// =============================================================================

/// The StatefulSet backing one LRP.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkloadInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub replicas: u32,
    /// Labels selecting the workload's pods.
    pub selector: BTreeMap<String, String>,
}

impl WorkloadInfo {
    /// Raw route annotation, if any.
    pub fn routes_raw(&self) -> Option<&str> {
        self.annotations.get(annotations::ROUTES).map(String::as_str)
    }

    /// Parsed route annotation; absent means no routes.
    pub fn routes(&self) -> Result<Vec<Route>, RouteError> {
        match self.routes_raw() {
            Some(raw) => parse_routes(raw),
            None => Ok(Vec::new()),
        }
    }

    /// Process GUID annotation, if any.
    pub fn process_guid(&self) -> Option<&str> {
        self.annotations
            .get(annotations::PROCESS_GUID)
            .map(String::as_str)
    }

    /// Label selector for the workload's pods.
    pub fn pod_selector(&self) -> String {
        selector_string(&self.selector)
    }
}

impl ClusterObject for WorkloadInfo {
    fn key(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Events
// =============================================================================

/// Reference to the object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusterEvent {
    pub name: String,
    pub namespace: String,
    pub reason: String,
    pub message: String,
    pub involved: ObjectReference,
    /// Times this event has been observed; repeats bump the count.
    pub count: i32,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ClusterEvent {
    /// Field selector matching events about `pod`.
    pub fn field_selector_for(pod: &PodInfo) -> String {
        format!(
            "involvedObject.namespace={},involvedObject.uid={},involvedObject.name={}",
            pod.namespace, pod.uid, pod.name
        )
    }

    /// Returns true if this event is about `pod`.
    pub fn involves(&self, pod: &PodInfo) -> bool {
        self.involved.namespace == pod.namespace
            && self.involved.uid == pod.uid
            && self.involved.name == pod.name
    }
}

impl ClusterObject for ClusterEvent {
    fn key(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Usage
// =============================================================================

/// Resource usage sample of one pod.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PodUsage {
    pub pod_name: String,
    pub cpu_millicores: f64,
    pub memory_bytes: u64,
}
