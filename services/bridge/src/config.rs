//! Configuration for the bridge.
//!
//! Everything is read from `TETHER_*` environment variables. Missing required
//! values are fatal at startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tether_reconcile::{DEFAULT_METRICS_INTERVAL, DEFAULT_POLL_INTERVAL, DEFAULT_REWATCH_DELAY};

/// Message-bus settings.
#[derive(Debug, Clone)]
pub struct NatsSettings {
    pub ip: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub reconnect_delay: Duration,
}

impl NatsSettings {
    /// `host:port` of the bus.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Telemetry ingress settings (mutual TLS).
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// `host:port` of the ingress endpoint.
    pub address: String,
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace holding the managed workloads.
    pub namespace: String,

    /// Explicit kubeconfig; in-cluster or default config when unset.
    pub kubeconfig: Option<PathBuf>,

    /// Route collector period.
    pub route_poll_interval: Duration,

    /// Capacity of the informer-to-emitter route queue.
    pub route_queue_capacity: usize,

    /// Delay before re-opening a closed watch.
    pub rewatch_delay: Duration,

    pub nats: NatsSettings,

    /// Metrics are disabled when unset.
    pub telemetry: Option<TelemetrySettings>,

    /// Metrics collection and drain period.
    pub metrics_interval: Duration,

    /// Number of metric batches buffered between collector and emitter.
    pub metrics_queue_capacity: usize,

    /// Crash reports are POSTed here when set; otherwise they are logged.
    pub crash_callback_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            get(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{key} must be set"))
        };
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{key} must be a number of seconds, got {raw:?}")),
                None => Ok(default),
            }
        };
        let interval = |key: &str, default: Duration| -> Result<Duration> {
            let value = secs(key, default)?;
            if value.is_zero() {
                bail!("{key} must be greater than zero");
            }
            Ok(value)
        };
        let count = |key: &str, default: usize| -> Result<usize> {
            match get(key) {
                Some(raw) => {
                    let value = raw
                        .parse::<usize>()
                        .with_context(|| format!("{key} must be a positive integer, got {raw:?}"))?;
                    if value == 0 {
                        bail!("{key} must be greater than zero");
                    }
                    Ok(value)
                }
                None => Ok(default),
            }
        };

        let namespace = required("TETHER_NAMESPACE")?;

        let nats = NatsSettings {
            ip: required("TETHER_NATS_IP")?,
            port: match get("TETHER_NATS_PORT") {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("TETHER_NATS_PORT must be a port, got {raw:?}"))?,
                None => 4222,
            },
            user: get("TETHER_NATS_USER").unwrap_or_else(|| "nats".to_string()),
            password: required("TETHER_NATS_PASSWORD")?,
            reconnect_delay: secs("TETHER_NATS_RECONNECT_SECS", Duration::from_secs(2))?,
        };

        let telemetry = match get("TETHER_LOGGREGATOR_ADDRESS").filter(|v| !v.is_empty()) {
            Some(address) => Some(TelemetrySettings {
                address,
                ca_path: required("TETHER_LOGGREGATOR_CA_PATH")?.into(),
                cert_path: required("TETHER_LOGGREGATOR_CERT_PATH")?.into(),
                key_path: required("TETHER_LOGGREGATOR_KEY_PATH")?.into(),
            }),
            None => {
                let stray = [
                    "TETHER_LOGGREGATOR_CA_PATH",
                    "TETHER_LOGGREGATOR_CERT_PATH",
                    "TETHER_LOGGREGATOR_KEY_PATH",
                ]
                .into_iter()
                .find(|key| get(key).is_some_and(|v| !v.is_empty()));
                if let Some(key) = stray {
                    bail!("{key} is set but TETHER_LOGGREGATOR_ADDRESS is not");
                }
                None
            }
        };

        Ok(Self {
            namespace,
            kubeconfig: get("TETHER_KUBECONFIG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            route_poll_interval: interval("TETHER_ROUTE_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?,
            route_queue_capacity: count("TETHER_ROUTE_QUEUE_CAPACITY", 256)?,
            rewatch_delay: secs("TETHER_REWATCH_DELAY_SECS", DEFAULT_REWATCH_DELAY)?,
            nats,
            telemetry,
            metrics_interval: interval("TETHER_METRICS_INTERVAL_SECS", DEFAULT_METRICS_INTERVAL)?,
            metrics_queue_capacity: count("TETHER_METRICS_QUEUE_CAPACITY", 5)?,
            crash_callback_url: get("TETHER_CRASH_CALLBACK_URL").filter(|v| !v.is_empty()),
            log_level: get("TETHER_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}
