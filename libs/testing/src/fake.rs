//! In-memory orchestrator.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tether_cluster::{
    annotations, labels, list_instances, reasons, ClusterClient, ClusterError, ClusterEvent,
    ContainerState, ObjectReference, PodInfo, PodUsage, Termination, WatchEvent, WatchStream,
    WorkloadInfo,
};
use tether_id::instance_name;
use tether_lrp::{Desirer, DesirerError, Instance, Lrp, LrpIdentifier};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

type WatchSender<T> = mpsc::UnboundedSender<Result<WatchEvent<T>, ClusterError>>;

/// Object kinds that can be watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Pods,
    Workloads,
    Events,
}

#[derive(Default)]
struct State {
    lrps: BTreeMap<String, Lrp>,
    workloads: BTreeMap<String, WorkloadInfo>,
    pods: BTreeMap<String, PodInfo>,
    events: Vec<ClusterEvent>,
    usage: Vec<PodUsage>,
    fail_lists: bool,
    next_host: u32,
    next_uid: u64,
    pod_watchers: Vec<WatchSender<PodInfo>>,
    workload_watchers: Vec<WatchSender<WorkloadInfo>>,
    event_watchers: Vec<WatchSender<ClusterEvent>>,
}

/// In-memory cluster that behaves like a StatefulSet controller.
///
/// Every mutation is applied and broadcast to open watches under one lock, so a
/// watcher never misses or double-sees a change around its initial list.
pub struct FakeCluster {
    namespace: String,
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(State {
                next_host: 5,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// All pods, ordered by name.
    pub fn pods(&self) -> Vec<PodInfo> {
        self.lock().pods.values().cloned().collect()
    }

    /// A pod by name.
    pub fn pod(&self, name: &str) -> Option<PodInfo> {
        self.lock().pods.get(name).cloned()
    }

    /// A workload by name.
    pub fn workload(&self, name: &str) -> Option<WorkloadInfo> {
        self.lock().workloads.get(name).cloned()
    }

    /// Number of open watches of `kind`.
    pub fn watcher_count(&self, kind: WatchKind) -> usize {
        let mut state = self.lock();
        match kind {
            WatchKind::Pods => {
                state.pod_watchers.retain(|tx| !tx.is_closed());
                state.pod_watchers.len()
            }
            WatchKind::Workloads => {
                state.workload_watchers.retain(|tx| !tx.is_closed());
                state.workload_watchers.len()
            }
            WatchKind::Events => {
                state.event_watchers.retain(|tx| !tx.is_closed());
                state.event_watchers.len()
            }
        }
    }

    /// Waits until at least `count` watches of `kind` are open.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within five seconds.
    pub async fn wait_for_watchers(&self, kind: WatchKind, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.watcher_count(kind) < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} {kind:?} watchers"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    /// Makes list calls fail until reset.
    pub fn fail_lists(&self, fail: bool) {
        self.lock().fail_lists = fail;
    }

    /// Ends every open watch of `kind`, as an API server timeout would.
    pub fn close_watches(&self, kind: WatchKind) {
        let mut state = self.lock();
        match kind {
            WatchKind::Pods => state.pod_watchers.clear(),
            WatchKind::Workloads => state.workload_watchers.clear(),
            WatchKind::Events => state.event_watchers.clear(),
        }
    }

    /// Sends a watch error to every open pod watch.
    pub fn inject_pod_watch_error(&self, message: &str) {
        let mut state = self.lock();
        state
            .pod_watchers
            .retain(|tx| tx.send(Err(ClusterError::Watch(message.to_string()))).is_ok());
    }

    // -------------------------------------------------------------------------
    // Direct mutation
    // -------------------------------------------------------------------------

    /// Inserts or replaces a pod and broadcasts the change.
    pub fn apply_pod(&self, pod: PodInfo) {
        let mut state = self.lock();
        state.pods.insert(pod.name.clone(), pod.clone());
        broadcast(&mut state.pod_watchers, WatchEvent::Apply(pod));
    }

    /// Inserts or replaces a workload and broadcasts the change.
    pub fn apply_workload(&self, workload: WorkloadInfo) {
        let mut state = self.lock();
        state
            .workloads
            .insert(workload.name.clone(), workload.clone());
        broadcast(&mut state.workload_watchers, WatchEvent::Apply(workload));
    }

    /// Flips readiness of a pod.
    pub fn set_pod_ready(&self, name: &str, ready: bool) {
        let mut state = self.lock();
        let Some(pod) = state.pods.get_mut(name) else {
            return;
        };
        pod.ready = ready;
        let pod = pod.clone();
        broadcast(&mut state.pod_watchers, WatchEvent::Apply(pod));
    }

    /// Replaces the usage samples returned by `list_pod_usage`.
    pub fn set_usage(&self, usage: Vec<PodUsage>) {
        self.lock().usage = usage;
    }

    /// Deletes the workload of an LRP but leaves its pods running, as happens
    /// while garbage collection of dependents is still pending.
    pub fn delete_workload_only(&self, identifier: &LrpIdentifier) -> Option<WorkloadInfo> {
        let mut state = self.lock();
        let name = identifier.process_guid().to_string();
        state.lrps.remove(&name);
        let workload = state.workloads.remove(&name)?;
        broadcast(
            &mut state.workload_watchers,
            WatchEvent::Delete(workload.clone()),
        );
        Some(workload)
    }

    /// Records an event against a pod, bumping the count of a repeated reason.
    pub fn record_event(&self, pod_name: &str, reason: &str, message: &str) -> Option<ClusterEvent> {
        let mut state = self.lock();
        let pod = state.pods.get(pod_name)?.clone();
        Some(state.record_event(&pod, reason, message))
    }

    /// Crashes an instance: bumps its restart count, records the exit, puts it
    /// in crash-loop back-off and records a `BackOff` event.
    pub fn crash_instance(
        &self,
        identifier: &LrpIdentifier,
        index: u32,
        exit_code: i32,
    ) -> Option<ClusterEvent> {
        let mut state = self.lock();
        let name = instance_name(identifier.process_guid().as_str(), index);
        let pod = state.pods.get_mut(&name)?;

        let container = pod.container.get_or_insert_with(ContainerState::default);
        container.restart_count += 1;
        container.waiting_reason = Some(reasons::CRASH_LOOP_BACK_OFF.to_string());
        container.last_termination = Some(Termination {
            exit_code,
            reason: Some("Error".to_string()),
            message: Some(format!("exited with status {exit_code}")),
        });
        pod.ready = false;

        let pod = pod.clone();
        broadcast(&mut state.pod_watchers, WatchEvent::Apply(pod.clone()));
        Some(state.record_event(&pod, reasons::BACK_OFF, "Back-off restarting failed container"))
    }
}

impl State {
    fn uid(&mut self, prefix: &str) -> String {
        self.next_uid += 1;
        format!("{prefix}-uid-{}", self.next_uid)
    }

    fn create_pod(&mut self, workload: &WorkloadInfo, lrp: &Lrp, index: u32) {
        let name = instance_name(&workload.name, index);
        let pending = PodInfo {
            uid: self.uid(&name),
            name: name.clone(),
            namespace: workload.namespace.clone(),
            labels: workload.labels.clone(),
            owner: Some(workload.name.clone()),
            container: Some(ContainerState::default()),
            memory_limit_bytes: Some(lrp.memory_mb * 1024 * 1024),
            disk_limit_bytes: Some(lrp.disk_mb * 1024 * 1024),
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        self.pods.insert(name.clone(), pending.clone());
        broadcast(&mut self.pod_watchers, WatchEvent::Apply(pending.clone()));

        let running = PodInfo {
            ip: Some(format!("10.0.0.{}", self.next_host)),
            ready: true,
            ..pending
        };
        self.next_host += 1;
        self.pods.insert(name, running.clone());
        broadcast(&mut self.pod_watchers, WatchEvent::Apply(running));
    }

    fn delete_pod(&mut self, name: &str) -> Option<PodInfo> {
        let pod = self.pods.get_mut(name)?;
        pod.terminating = true;
        let terminating = pod.clone();
        broadcast(&mut self.pod_watchers, WatchEvent::Apply(terminating));

        let deleted = self.pods.remove(name)?;
        broadcast(&mut self.pod_watchers, WatchEvent::Delete(deleted.clone()));
        Some(deleted)
    }

    fn pods_of(&self, workload: &str) -> Vec<PodInfo> {
        self.pods
            .values()
            .filter(|p| p.owner.as_deref() == Some(workload))
            .cloned()
            .collect()
    }

    fn record_event(&mut self, pod: &PodInfo, reason: &str, message: &str) -> ClusterEvent {
        let now = Utc::now();
        let existing = self
            .events
            .iter()
            .position(|e| e.involves(pod) && e.reason == reason);

        let event = match existing {
            Some(position) => {
                let event = &mut self.events[position];
                event.count += 1;
                event.message = message.to_string();
                event.timestamp = Some(now);
                event.clone()
            }
            None => {
                let event = ClusterEvent {
                    name: format!("{}.{}", pod.name, self.uid("event")),
                    namespace: pod.namespace.clone(),
                    reason: reason.to_string(),
                    message: message.to_string(),
                    involved: ObjectReference {
                        kind: "Pod".to_string(),
                        name: pod.name.clone(),
                        namespace: pod.namespace.clone(),
                        uid: pod.uid.clone(),
                    },
                    count: 1,
                    timestamp: Some(now),
                };
                self.events.push(event.clone());
                event
            }
        };

        broadcast(&mut self.event_watchers, WatchEvent::Apply(event.clone()));
        event
    }
}

fn broadcast<T: Clone>(watchers: &mut Vec<WatchSender<T>>, event: WatchEvent<T>) {
    watchers.retain(|tx| tx.send(Ok(event.clone())).is_ok());
}

fn subscribe<T>(watchers: &mut Vec<WatchSender<T>>, snapshot: Vec<T>) -> WatchStream<T>
where
    T: Clone + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Ok(WatchEvent::Init));
    for obj in snapshot {
        let _ = tx.send(Ok(WatchEvent::InitApply(obj)));
    }
    let _ = tx.send(Ok(WatchEvent::InitDone));
    watchers.push(tx);

    UnboundedReceiverStream::new(rx).boxed()
}

fn matches_selector(pod: &PodInfo, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => pod.labels.get(key).map(String::as_str) == Some(value),
            None => pod.labels.contains_key(term),
        })
}

fn workload_for(namespace: &str, lrp: &Lrp) -> WorkloadInfo {
    let name = lrp.process_guid().to_string();
    let selector = BTreeMap::from([
        (labels::GUID.to_string(), lrp.identifier.guid.clone()),
        (labels::VERSION.to_string(), lrp.identifier.version.clone()),
    ]);
    let mut pod_labels = selector.clone();
    pod_labels.insert(
        labels::SOURCE_TYPE.to_string(),
        labels::APP_SOURCE_TYPE.to_string(),
    );

    let mut annotations = BTreeMap::from([(annotations::PROCESS_GUID.to_string(), name.clone())]);
    if let Some(routes) = lrp.metadata.get(annotations::ROUTES) {
        annotations.insert(annotations::ROUTES.to_string(), routes.clone());
    }

    WorkloadInfo {
        uid: format!("{name}-workload"),
        name,
        namespace: namespace.to_string(),
        labels: pod_labels,
        annotations,
        replicas: lrp.target_instances,
        selector,
    }
}

// =============================================================================
// ClusterClient
// =============================================================================

#[async_trait]
impl ClusterClient for FakeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodInfo>, ClusterError> {
        let state = self.lock();
        if state.fail_lists {
            return Err(ClusterError::Api("injected list failure".to_string()));
        }
        Ok(state
            .pods
            .values()
            .filter(|p| matches_selector(p, label_selector))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, name: &str) -> Result<Option<PodInfo>, ClusterError> {
        Ok(self.lock().pods.get(name).cloned())
    }

    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadInfo>, ClusterError> {
        Ok(self.lock().workloads.get(name).cloned())
    }

    async fn list_pod_events(&self, pod: &PodInfo) -> Result<Vec<ClusterEvent>, ClusterError> {
        let state = self.lock();
        if state.fail_lists {
            return Err(ClusterError::Api("injected list failure".to_string()));
        }
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.involves(pod))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn list_pod_usage(&self) -> Result<Vec<PodUsage>, ClusterError> {
        let state = self.lock();
        if state.fail_lists {
            return Err(ClusterError::Api("injected list failure".to_string()));
        }
        Ok(state.usage.clone())
    }

    fn watch_pods(&self) -> WatchStream<PodInfo> {
        let mut state = self.lock();
        let snapshot = state.pods.values().cloned().collect();
        subscribe(&mut state.pod_watchers, snapshot)
    }

    fn watch_workloads(&self) -> WatchStream<WorkloadInfo> {
        let mut state = self.lock();
        let snapshot = state.workloads.values().cloned().collect();
        subscribe(&mut state.workload_watchers, snapshot)
    }

    fn watch_events(&self) -> WatchStream<ClusterEvent> {
        let mut state = self.lock();
        let snapshot = state.events.clone();
        subscribe(&mut state.event_watchers, snapshot)
    }
}

// =============================================================================
// Desirer
// =============================================================================

#[async_trait]
impl Desirer for FakeCluster {
    async fn desire(&self, lrp: &Lrp) -> Result<(), DesirerError> {
        let mut state = self.lock();
        let key = lrp.process_guid().to_string();
        if state.lrps.contains_key(&key) {
            return Err(DesirerError::AlreadyExists(key));
        }

        let workload = workload_for(&self.namespace, lrp);
        debug!(workload = %workload.name, replicas = workload.replicas, "Desiring workload");
        state.lrps.insert(key, lrp.clone());
        state
            .workloads
            .insert(workload.name.clone(), workload.clone());
        broadcast(
            &mut state.workload_watchers,
            WatchEvent::Apply(workload.clone()),
        );

        for index in 0..lrp.target_instances {
            state.create_pod(&workload, lrp, index);
        }
        Ok(())
    }

    async fn update(&self, lrp: &Lrp) -> Result<(), DesirerError> {
        let mut state = self.lock();
        let key = lrp.process_guid().to_string();
        if !state.lrps.contains_key(&key) {
            return Err(DesirerError::NotFound(key));
        }

        let workload = workload_for(&self.namespace, lrp);
        state.lrps.insert(key, lrp.clone());
        state
            .workloads
            .insert(workload.name.clone(), workload.clone());
        broadcast(
            &mut state.workload_watchers,
            WatchEvent::Apply(workload.clone()),
        );

        let mut existing = state.pods_of(&workload.name);
        existing.sort_by_key(|p| std::cmp::Reverse(p.index()));
        for pod in existing {
            if pod.index().is_some_and(|i| i >= lrp.target_instances) {
                state.delete_pod(&pod.name);
            }
        }
        for index in 0..lrp.target_instances {
            if !state.pods.contains_key(&instance_name(&workload.name, index)) {
                state.create_pod(&workload, lrp, index);
            }
        }
        Ok(())
    }

    async fn stop(&self, identifier: &LrpIdentifier) -> Result<(), DesirerError> {
        let mut state = self.lock();
        let key = identifier.process_guid().to_string();
        if state.lrps.remove(&key).is_none() {
            return Err(DesirerError::NotFound(key));
        }

        if let Some(workload) = state.workloads.remove(&key) {
            broadcast(&mut state.workload_watchers, WatchEvent::Delete(workload));
        }
        for pod in state.pods_of(&key) {
            state.delete_pod(&pod.name);
        }
        Ok(())
    }

    async fn stop_instance(
        &self,
        identifier: &LrpIdentifier,
        index: u32,
    ) -> Result<(), DesirerError> {
        let mut state = self.lock();
        let key = identifier.process_guid().to_string();
        let Some(lrp) = state.lrps.get(&key).cloned() else {
            return Err(DesirerError::NotFound(key));
        };
        if index >= lrp.target_instances {
            return Err(DesirerError::InvalidIndex {
                process_guid: key,
                index,
            });
        }
        let Some(workload) = state.workloads.get(&key).cloned() else {
            return Err(DesirerError::NotFound(key));
        };

        let name = instance_name(&key, index);
        if state.delete_pod(&name).is_none() {
            return Err(DesirerError::NotFound(name));
        }
        state.create_pod(&workload, &lrp, index);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Lrp>, DesirerError> {
        Ok(self.lock().lrps.values().cloned().collect())
    }

    async fn get(&self, identifier: &LrpIdentifier) -> Result<Lrp, DesirerError> {
        let key = identifier.process_guid().to_string();
        self.lock()
            .lrps
            .get(&key)
            .cloned()
            .ok_or(DesirerError::NotFound(key))
    }

    async fn get_instances(
        &self,
        identifier: &LrpIdentifier,
    ) -> Result<Vec<Instance>, DesirerError> {
        let key = identifier.process_guid().to_string();
        let pods = {
            let state = self.lock();
            if !state.lrps.contains_key(&key) {
                return Err(DesirerError::NotFound(key));
            }
            state.pods_of(&key)
        };

        list_instances(self, &pods)
            .await
            .map_err(|e| DesirerError::Orchestrator(e.to_string()))
    }
}
