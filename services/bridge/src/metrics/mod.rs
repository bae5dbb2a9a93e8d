//! Buffered metrics forwarding.
//!
//! Producers put whole [`MetricBatch`]es on a bounded queue. The emitter drains
//! at most one batch per scheduled run and forwards its messages in order; a
//! failed message is logged and the rest of the batch still goes out.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tether_events::{MetricBatch, MetricMessage};
use tether_reconcile::TaskScheduler;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub mod collector;
pub mod forwarder;

pub use collector::MetricsCollector;
pub use forwarder::{
    Gauge, GaugeValue, HttpIngressClient, IngressClient, LoggregatorForwarder, TelemetryError,
};

/// Delivers one metric message to the telemetry backend.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, message: &MetricMessage) -> Result<(), TelemetryError>;
}

/// Drains the metrics queue on a schedule.
pub struct MetricsEmitter<S> {
    work: Arc<Mutex<mpsc::Receiver<MetricBatch>>>,
    scheduler: S,
    forwarder: Arc<dyn Forwarder>,
}

impl<S: TaskScheduler> MetricsEmitter<S> {
    pub fn new(
        work: mpsc::Receiver<MetricBatch>,
        scheduler: S,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            work: Arc::new(Mutex::new(work)),
            scheduler,
            forwarder,
        }
    }

    /// Arms the drain task.
    pub fn start(&self) {
        info!("Starting metrics emitter");

        let work = Arc::clone(&self.work);
        let forwarder = Arc::clone(&self.forwarder);
        self.scheduler.schedule("metrics-emitter", move || {
            let work = Arc::clone(&work);
            let forwarder = Arc::clone(&forwarder);
            async move { drain_one(&work, forwarder.as_ref()).await }
        });
    }

    /// Returns the underlying scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}

async fn drain_one(
    work: &Mutex<mpsc::Receiver<MetricBatch>>,
    forwarder: &dyn Forwarder,
) -> anyhow::Result<()> {
    let batch = {
        let mut rx = work.lock().unwrap_or_else(|e| e.into_inner());
        rx.try_recv().ok()
    };
    let Some(batch) = batch else {
        return Ok(());
    };

    let total = batch.len();
    let mut failed = 0;
    let mut last_error = None;
    for message in &batch {
        if let Err(e) = forwarder.forward(message).await {
            warn!(app_id = %message.app_id, index = %message.index_id, error = %e, "Failed to forward metrics");
            failed += 1;
            last_error = Some(e);
        }
    }

    match last_error {
        None => {
            debug!(messages = total, "Forwarded metrics batch");
            Ok(())
        }
        Some(e) => Err(anyhow::anyhow!(
            "{failed} of {total} metric messages failed to forward, last error: {e}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_events::{metric_names, Measurement};
    use tether_reconcile::ManualScheduler;

    #[derive(Default)]
    struct RecordingForwarder {
        fail_app: Option<String>,
        forwarded: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Forwarder for RecordingForwarder {
        async fn forward(&self, message: &MetricMessage) -> Result<(), TelemetryError> {
            if self.fail_app.as_deref() == Some(message.app_id.as_str()) {
                return Err(TelemetryError::Rejected {
                    status: 500,
                    body: "nope".to_string(),
                });
            }
            self.forwarded
                .lock()
                .unwrap()
                .push(format!("{}/{}", message.app_id, message.index_id));
            Ok(())
        }
    }

    fn message(app: &str, index: &str) -> MetricMessage {
        MetricMessage::new(app, index)
            .with_metric(metric_names::CPU, Measurement::new(1.0, metric_names::CPU_UNIT))
    }

    #[tokio::test]
    async fn test_forwards_one_batch_per_run_in_order() {
        let (tx, rx) = mpsc::channel(5);
        let forwarder = Arc::new(RecordingForwarder::default());
        let emitter = MetricsEmitter::new(rx, ManualScheduler::new(), forwarder.clone());
        emitter.start();

        tx.send(vec![message("a", "0"), message("b", "1")]).await.unwrap();
        tx.send(vec![message("c", "0")]).await.unwrap();

        emitter.scheduler().trigger(0).await.unwrap();
        assert_eq!(*forwarder.forwarded.lock().unwrap(), vec!["a/0", "b/1"]);

        emitter.scheduler().trigger(0).await.unwrap();
        assert_eq!(forwarder.forwarded.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_noop() {
        let (_tx, rx) = mpsc::channel(5);
        let forwarder = Arc::new(RecordingForwarder::default());
        let emitter = MetricsEmitter::new(rx, ManualScheduler::new(), forwarder.clone());
        emitter.start();

        emitter.scheduler().trigger(0).await.unwrap();
        assert!(forwarder.forwarded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_batch() {
        let (tx, rx) = mpsc::channel(5);
        let forwarder = Arc::new(RecordingForwarder {
            fail_app: Some("a".to_string()),
            ..Default::default()
        });
        let emitter = MetricsEmitter::new(rx, ManualScheduler::new(), forwarder.clone());
        emitter.start();

        tx.send(vec![message("a", "0"), message("b", "0")]).await.unwrap();

        let err = emitter.scheduler().trigger(0).await.unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        assert_eq!(*forwarder.forwarded.lock().unwrap(), vec!["b/0"]);
    }
}
