//! Telemetry ingress: metric messages as gauge envelopes over mutual TLS.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tether_events::MetricMessage;
use thiserror::Error;
use tracing::{debug, error};

use super::Forwarder;
use crate::config::TelemetrySettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telemetry delivery failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to read {}: {source}", path.display())]
    ReadTls {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ingress rejected envelope: {status} {body}")]
    Rejected { status: u16, body: String },
}

/// One gauge value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeValue {
    pub unit: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeMetrics {
    pub metrics: BTreeMap<String, GaugeValue>,
}

/// Gauge envelope as accepted by the ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    pub source_id: String,
    pub instance_id: String,
    /// Unix nanoseconds.
    pub timestamp: i64,
    pub gauge: GaugeMetrics,
}

impl Gauge {
    pub fn from_message(message: &MetricMessage, timestamp: i64) -> Self {
        let metrics = message
            .metrics
            .iter()
            .map(|(name, m)| {
                (
                    name.clone(),
                    GaugeValue {
                        unit: m.unit.clone(),
                        value: m.magnitude,
                    },
                )
            })
            .collect();

        Self {
            source_id: message.app_id.clone(),
            instance_id: message.index_id.clone(),
            timestamp,
            gauge: GaugeMetrics { metrics },
        }
    }
}

#[derive(Serialize)]
struct EnvelopeBatch<'a> {
    envelopes: [&'a Gauge; 1],
}

/// Sends gauges to the telemetry backend.
#[async_trait]
pub trait IngressClient: Send + Sync {
    async fn emit_gauge(&self, gauge: &Gauge) -> Result<(), TelemetryError>;
}

/// Converts metric messages to gauges.
pub struct LoggregatorForwarder {
    client: Arc<dyn IngressClient>,
}

impl LoggregatorForwarder {
    pub fn new(client: Arc<dyn IngressClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Forwarder for LoggregatorForwarder {
    async fn forward(&self, message: &MetricMessage) -> Result<(), TelemetryError> {
        if message.metrics.is_empty() {
            return Ok(());
        }
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.client
            .emit_gauge(&Gauge::from_message(message, timestamp))
            .await
    }
}

/// HTTPS ingress client authenticating with a client certificate.
pub struct HttpIngressClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIngressClient {
    /// Builds a client from the configured certificate, key and CA.
    pub fn new(settings: &TelemetrySettings) -> Result<Self, TelemetryError> {
        let ca = read(&settings.ca_path)?;
        let mut identity = read(&settings.cert_path)?;
        identity.extend(read(&settings.key_path)?);

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca)?)
            .identity(reqwest::Identity::from_pem(&identity)?)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("https://{}", settings.address),
        })
    }

    /// Plain client against `base_url`, without TLS material.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, TelemetryError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

fn read(path: &Path) -> Result<Vec<u8>, TelemetryError> {
    std::fs::read(path).map_err(|source| TelemetryError::ReadTls {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl IngressClient for HttpIngressClient {
    async fn emit_gauge(&self, gauge: &Gauge) -> Result<(), TelemetryError> {
        let url = format!("{}/v2/envelopes", self.base_url);
        debug!(source_id = %gauge.source_id, instance_id = %gauge.instance_id, "Sending gauge");

        let response = self
            .client
            .post(&url)
            .json(&EnvelopeBatch { envelopes: [gauge] })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Ingress rejected gauge");
            return Err(TelemetryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
