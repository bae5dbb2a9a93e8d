//! Crash detection from pod lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tether_cluster::{reasons, ClusterClient, ClusterEvent, PodInfo};
use tether_events::CrashReport;
use tracing::{debug, info, warn};

use super::{Change, ChangeHandler};

/// Returns true for events that signal an app crash: container back-off, OOM
/// kills, and kills caused by a failed probe.
pub fn is_crash_event(event: &ClusterEvent) -> bool {
    if event.involved.kind != "Pod" {
        return false;
    }

    match event.reason.as_str() {
        reasons::BACK_OFF | reasons::OOM_KILLING => true,
        reasons::KILLING => {
            let message = event.message.to_ascii_lowercase();
            message.contains("failed") && message.contains("probe")
        }
        _ => false,
    }
}

/// Turns a crash event and its pod into a report.
pub trait CrashReportGenerator: Send + Sync + 'static {
    /// Returns `None` if the pod cannot be attributed to an LRP instance.
    fn generate(&self, event: &ClusterEvent, pod: &PodInfo) -> Option<CrashReport>;
}

/// Builds reports from pod labels and the container's last termination.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCrashReportGenerator;

impl CrashReportGenerator for DefaultCrashReportGenerator {
    fn generate(&self, event: &ClusterEvent, pod: &PodInfo) -> Option<CrashReport> {
        let process_guid = pod.process_guid()?;
        let index = pod.index()?;

        let container = pod.container.clone().unwrap_or_default();
        let termination = container.last_termination;

        let mut report =
            CrashReport::for_process(process_guid, event.timestamp.unwrap_or_else(Utc::now));
        report.instance = pod.name.clone();
        report.index = index;
        report.reason = termination
            .as_ref()
            .and_then(|t| t.reason.clone())
            .unwrap_or_else(|| event.reason.clone());
        report.exit_status = termination.as_ref().map(|t| t.exit_code);
        report.exit_description = termination
            .and_then(|t| t.message)
            .unwrap_or_else(|| event.message.clone());
        report.crash_count = container.restart_count.max(event.count);
        Some(report)
    }
}

/// Emits a crash report for each new or re-counted crash event of a managed
/// app pod.
///
/// Events last seen before the handler was created are ignored, so the initial
/// list does not replay history.
pub struct CrashEventHandler<G = DefaultCrashReportGenerator> {
    client: Arc<dyn ClusterClient>,
    generator: G,
    since: DateTime<Utc>,
}

impl CrashEventHandler<DefaultCrashReportGenerator> {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self::with_generator(client, DefaultCrashReportGenerator)
    }
}

impl<G: CrashReportGenerator> CrashEventHandler<G> {
    pub fn with_generator(client: Arc<dyn ClusterClient>, generator: G) -> Self {
        Self {
            client,
            generator,
            since: Utc::now(),
        }
    }

    /// Overrides the cut-off for historical events.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = since;
        self
    }

    async fn report(&self, event: &ClusterEvent) -> Option<CrashReport> {
        if event.timestamp.is_some_and(|t| t < self.since) {
            debug!(event = %event.name, "Ignoring historical event");
            return None;
        }
        if !is_crash_event(event) {
            return None;
        }

        let pod = match self.client.get_pod(&event.involved.name).await {
            Ok(Some(pod)) => pod,
            Ok(None) => {
                debug!(pod = %event.involved.name, "Crashed pod no longer exists");
                return None;
            }
            Err(e) => {
                warn!(pod = %event.involved.name, error = %e, "Failed to get crashed pod");
                return None;
            }
        };

        if !event.involved.uid.is_empty() && pod.uid != event.involved.uid {
            debug!(pod = %pod.name, "Event refers to a previous pod with the same name");
            return None;
        }
        if !pod.is_managed_app() {
            return None;
        }

        let report = self.generator.generate(event, &pod)?;
        info!(
            process_guid = %report.process_guid,
            instance = %report.instance,
            reason = %report.reason,
            crash_count = report.crash_count,
            "App instance crashed"
        );
        Some(report)
    }
}

#[async_trait]
impl<G: CrashReportGenerator> ChangeHandler<ClusterEvent> for CrashEventHandler<G> {
    type Output = CrashReport;

    fn name(&self) -> &'static str {
        "crash"
    }

    async fn handle(&self, change: &Change<ClusterEvent>) -> Vec<CrashReport> {
        let event = match change {
            Change::Added(event) => event,
            Change::Updated { old, new } if new.count > old.count => new,
            _ => return Vec::new(),
        };

        self.report(event).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;
    use tether_cluster::ObjectReference;
    use tether_lrp::Desirer;
    use tether_testing::{lrp, FakeCluster};

    fn event(reason: &str, message: &str) -> ClusterEvent {
        ClusterEvent {
            name: "odin-v1-0.1".to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            involved: ObjectReference {
                kind: "Pod".to_string(),
                name: "odin-v1-0".to_string(),
                ..Default::default()
            },
            count: 1,
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("BackOff", "Back-off restarting failed container", true)]
    #[case("OOMKilling", "Memory cgroup out of memory", true)]
    #[case("Killing", "Container app failed liveness probe, will be restarted", true)]
    #[case("Killing", "Stopping container app", false)]
    #[case("Scheduled", "Successfully assigned", false)]
    fn test_crash_signature(#[case] reason: &str, #[case] message: &str, #[case] expected: bool) {
        assert_eq!(is_crash_event(&event(reason, message)), expected);
    }

    #[test]
    fn test_non_pod_events_are_ignored() {
        let mut event = event("BackOff", "");
        event.involved.kind = "StatefulSet".to_string();
        assert!(!is_crash_event(&event));
    }

    async fn crashed_cluster() -> (Arc<FakeCluster>, ClusterEvent) {
        let cluster = Arc::new(FakeCluster::new("apps"));
        let app = lrp("odin", "v1", 1, None);
        cluster.desire(&app).await.unwrap();
        let event = cluster.crash_instance(&app.identifier, 0, 137).unwrap();
        (cluster, event)
    }

    #[tokio::test]
    async fn test_report_from_pod_state() {
        let (cluster, event) = crashed_cluster().await;
        let handler = CrashEventHandler::new(cluster.clone()).since(Utc::now() - Duration::hours(1));

        let reports = handler.handle(&Change::Added(event)).await;
        assert_eq!(reports.len(), 1);

        let report = &reports[0];
        assert_eq!(report.process_guid.as_str(), "odin-v1");
        assert_eq!(report.instance, "odin-v1-0");
        assert_eq!(report.index, 0);
        assert_eq!(report.exit_status, Some(137));
        assert_eq!(report.reason, "Error");
        assert_eq!(report.crash_count, 1);
    }

    #[tokio::test]
    async fn test_recount_emits_again() {
        let (cluster, first) = crashed_cluster().await;
        let handler = CrashEventHandler::new(cluster.clone()).since(Utc::now() - Duration::hours(1));

        let mut second = first.clone();
        second.count = 2;
        let change = Change::Updated {
            old: first.clone(),
            new: second,
        };
        assert_eq!(handler.handle(&change).await.len(), 1);

        let unchanged = Change::Updated {
            old: first.clone(),
            new: first,
        };
        assert!(handler.handle(&unchanged).await.is_empty());
    }

    #[tokio::test]
    async fn test_historical_events_are_ignored() {
        let (cluster, event) = crashed_cluster().await;
        let handler = CrashEventHandler::new(cluster.clone()).since(Utc::now() + Duration::hours(1));

        assert!(handler.handle(&Change::Added(event)).await.is_empty());
    }

    #[tokio::test]
    async fn test_custom_generator() {
        struct Minimal;

        impl CrashReportGenerator for Minimal {
            fn generate(&self, event: &ClusterEvent, pod: &PodInfo) -> Option<CrashReport> {
                Some(CrashReport::for_process(
                    pod.process_guid()?,
                    event.timestamp.unwrap_or_else(Utc::now),
                ))
            }
        }

        let (cluster, event) = crashed_cluster().await;
        let handler = CrashEventHandler::with_generator(cluster.clone(), Minimal)
            .since(Utc::now() - Duration::hours(1));

        let reports = handler.handle(&Change::Added(event)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].instance, "");
    }
}
