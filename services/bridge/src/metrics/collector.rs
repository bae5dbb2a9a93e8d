//! Pod usage sampling.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tether_cluster::{ClusterClient, ClusterError, MANAGED_APP_SELECTOR};
use tether_events::{metric_names, Measurement, MetricBatch, MetricMessage};
use tether_reconcile::TaskScheduler;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Joins pod usage samples with pod limits into one batch per poll.
pub struct MetricsCollector {
    client: Arc<dyn ClusterClient>,
    queue: mpsc::Sender<MetricBatch>,
}

impl MetricsCollector {
    pub fn new(client: Arc<dyn ClusterClient>, queue: mpsc::Sender<MetricBatch>) -> Self {
        Self { client, queue }
    }

    /// Returns one message per sampled managed app pod, ordered by pod name.
    pub async fn collect(&self) -> Result<MetricBatch, ClusterError> {
        let usage = self.client.list_pod_usage().await?;
        let pods: HashMap<_, _> = self
            .client
            .list_pods(MANAGED_APP_SELECTOR)
            .await?
            .into_iter()
            .map(|pod| (pod.name.clone(), pod))
            .collect();

        let mut samples: Vec<_> = usage
            .iter()
            .filter_map(|sample| Some((sample, pods.get(&sample.pod_name)?)))
            .collect();
        samples.sort_by(|a, b| a.0.pod_name.cmp(&b.0.pod_name));

        let batch = samples
            .into_iter()
            .filter_map(|(sample, pod)| {
                let app_id = pod.app_guid()?;
                let index = pod.index()?;

                // 1000 millicores is one full core.
                let cpu = sample.cpu_millicores / 10.0;
                let memory_quota = pod.memory_limit_bytes.unwrap_or_default() as f64;
                let disk_quota = pod.disk_limit_bytes.unwrap_or_default() as f64;

                Some(
                    MetricMessage::new(app_id, index.to_string())
                        .with_metric(
                            metric_names::CPU,
                            Measurement::new(cpu, metric_names::CPU_UNIT),
                        )
                        .with_metric(
                            metric_names::MEMORY,
                            Measurement::new(sample.memory_bytes as f64, metric_names::MEMORY_UNIT),
                        )
                        .with_metric(
                            metric_names::MEMORY_QUOTA,
                            Measurement::new(memory_quota, metric_names::MEMORY_UNIT),
                        )
                        .with_metric(
                            metric_names::DISK,
                            Measurement::new(0.0, metric_names::DISK_UNIT),
                        )
                        .with_metric(
                            metric_names::DISK_QUOTA,
                            Measurement::new(disk_quota, metric_names::DISK_UNIT),
                        ),
                )
            })
            .collect();

        Ok(batch)
    }

    /// Collects and enqueues one batch. A full queue drops the batch.
    pub async fn poll(&self) -> anyhow::Result<()> {
        let batch = self.collect().await.context("collecting pod metrics")?;
        if batch.is_empty() {
            return Ok(());
        }

        let size = batch.len();
        match self.queue.try_send(batch) {
            Ok(()) => debug!(messages = size, "Queued metrics batch"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(messages = size, "Metrics queue full; dropping batch");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("metrics queue closed");
            }
        }
        Ok(())
    }

    /// Arms the polling task.
    pub fn start<S: TaskScheduler>(self: &Arc<Self>, scheduler: &S) {
        let collector = Arc::clone(self);
        scheduler.schedule("metrics-collector", move || {
            let collector = Arc::clone(&collector);
            async move { collector.poll().await }
        });
    }
}
