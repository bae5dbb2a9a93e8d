//! tether bridge
//!
//! Watches the LRP workloads of one namespace and keeps the router registry,
//! the crash callback and the telemetry ingress up to date.
//!
//! ## Tasks
//!
//! - **Route collector**: full route registration on every poll interval
//! - **Informers**: pod readiness, workload deletion and annotation changes,
//!   crash events
//! - **Emit loop**: publishes informer route messages over NATS
//! - **Crash loop**: delivers crash reports
//! - **Metrics**: pod usage sampling and forwarding (when telemetry is configured)

use std::sync::Arc;

use anyhow::{Context, Result};
use tether_bridge::collector::{CollectorScheduler, RouteCollector};
use tether_bridge::config::Config;
use tether_bridge::crash_sink::{run_crash_loop, CrashReportSink, HttpCrashReporter, LogCrashSink};
use tether_bridge::emitter::{run_emit_loop, NatsPublisher, RouteEmitter};
use tether_bridge::informer::{CrashEventHandler, Informer, InstanceChangeHandler, WorkloadHandler};
use tether_bridge::metrics::{
    HttpIngressClient, LoggregatorForwarder, MetricsCollector, MetricsEmitter,
};
use tether_cluster::{ClusterClient, KubeCluster};
use tether_reconcile::TickerTaskScheduler;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRASH_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        namespace = %config.namespace,
        nats = %config.nats.address(),
        telemetry = config.telemetry.is_some(),
        crash_callback = config.crash_callback_url.is_some(),
        "Starting tether bridge"
    );

    let cluster: Arc<dyn ClusterClient> = Arc::new(match &config.kubeconfig {
        Some(path) => KubeCluster::from_kubeconfig(path, &config.namespace).await,
        None => KubeCluster::try_default(&config.namespace).await,
    }
    .context("connecting to the orchestrator")?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // Routes
    let publisher = Arc::new(NatsPublisher::connect(
        config.nats.clone(),
        shutdown_rx.clone(),
    ));
    let emitter = Arc::new(RouteEmitter::new(publisher));
    let (route_tx, route_rx) = mpsc::channel(config.route_queue_capacity);

    handles.push(tokio::spawn(run_emit_loop(
        route_rx,
        Arc::clone(&emitter),
        shutdown_rx.clone(),
    )));

    let pods = Informer::pods(
        Arc::clone(&cluster),
        InstanceChangeHandler::new(Arc::clone(&cluster)),
        route_tx.clone(),
    )
    .with_rewatch_delay(config.rewatch_delay);
    handles.push(tokio::spawn(pods.run(shutdown_rx.clone())));

    let workloads = Informer::workloads(
        Arc::clone(&cluster),
        WorkloadHandler::new(Arc::clone(&cluster)),
        route_tx,
    )
    .with_rewatch_delay(config.rewatch_delay);
    handles.push(tokio::spawn(workloads.run(shutdown_rx.clone())));

    let collector = CollectorScheduler::new(
        Arc::new(RouteCollector::new(Arc::clone(&cluster))),
        emitter,
        TickerTaskScheduler::new(config.route_poll_interval, shutdown_rx.clone()),
    );
    collector.start();

    // Crashes
    let sink: Arc<dyn CrashReportSink> = match &config.crash_callback_url {
        Some(url) => Arc::new(HttpCrashReporter::new(url.as_str())?),
        None => Arc::new(LogCrashSink),
    };
    let (crash_tx, crash_rx) = mpsc::channel(CRASH_QUEUE_CAPACITY);
    handles.push(tokio::spawn(run_crash_loop(
        crash_rx,
        sink,
        shutdown_rx.clone(),
    )));

    let events = Informer::events(
        Arc::clone(&cluster),
        CrashEventHandler::new(Arc::clone(&cluster)),
        crash_tx,
    )
    .with_rewatch_delay(config.rewatch_delay);
    handles.push(tokio::spawn(events.run(shutdown_rx.clone())));

    // Metrics
    let metrics = match &config.telemetry {
        Some(settings) => {
            let ingress = HttpIngressClient::new(settings).context("building telemetry client")?;
            let forwarder = Arc::new(LoggregatorForwarder::new(Arc::new(ingress)));
            let (metrics_tx, metrics_rx) = mpsc::channel(config.metrics_queue_capacity);

            let emitter = MetricsEmitter::new(
                metrics_rx,
                TickerTaskScheduler::new(config.metrics_interval, shutdown_rx.clone()),
                forwarder,
            );
            emitter.start();
            Arc::new(MetricsCollector::new(Arc::clone(&cluster), metrics_tx))
                .start(emitter.scheduler());
            Some(emitter)
        }
        None => {
            info!("Telemetry not configured; metrics disabled");
            None
        }
    };

    // Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    collector.scheduler().join().await;
    if let Some(metrics) = &metrics {
        metrics.scheduler().join().await;
    }
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task panicked");
        }
    }

    info!("Bridge shutdown complete");
    Ok(())
}
