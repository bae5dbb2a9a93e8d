//! tether bridge library.
//!
//! The bridge observes LRP workloads in one orchestrator namespace and keeps
//! three external systems informed:
//!
//! - **Router registry**: route registrations, refreshed by the
//!   [`collector`] on a fixed interval and adjusted in near real time by the
//!   pod and workload [`informer`]s; published by the [`emitter`]
//! - **Crash callback**: crash reports derived from pod lifecycle events
//!   ([`informer::crash`], [`crash_sink`])
//! - **Telemetry ingress**: per-instance usage gauges ([`metrics`])
//!
//! Every long-running loop takes a `tokio::sync::watch::Receiver<bool>` and
//! exits once it reads `true`.

use tokio::sync::watch;

pub mod collector;
pub mod config;
pub mod crash_sink;
pub mod emitter;
pub mod informer;
pub mod metrics;
pub mod routing;

/// Resolves once shutdown has been requested or the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
