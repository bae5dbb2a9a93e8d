//! Crash report delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tether_events::CrashReport;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Receives crash reports from the crash informer.
#[async_trait]
pub trait CrashReportSink: Send + Sync {
    async fn report(&self, report: &CrashReport) -> Result<()>;
}

/// Logs crash reports; used when no callback is configured.
pub struct LogCrashSink;

#[async_trait]
impl CrashReportSink for LogCrashSink {
    async fn report(&self, report: &CrashReport) -> Result<()> {
        info!(
            process_guid = %report.process_guid,
            instance = %report.instance,
            index = report.index,
            reason = %report.reason,
            exit_status = ?report.exit_status,
            crash_count = report.crash_count,
            "Crash report"
        );
        Ok(())
    }
}

/// POSTs crash reports to the app lifecycle callback.
pub struct HttpCrashReporter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCrashReporter {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CrashReportSink for HttpCrashReporter {
    async fn report(&self, report: &CrashReport) -> Result<()> {
        let url = format!(
            "{}/internal/v4/apps/{}/crashed",
            self.base_url, report.process_guid
        );

        let response = self.client.post(&url).json(report).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to deliver crash report");
            anyhow::bail!("Failed to deliver crash report: {} - {}", status, body);
        }

        Ok(())
    }
}

/// Delivers queued crash reports until the queue closes or shutdown is
/// requested. Delivery is at most once.
pub async fn run_crash_loop(
    mut rx: mpsc::Receiver<CrashReport>,
    sink: Arc<dyn CrashReportSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting crash report loop");

    loop {
        let report = tokio::select! {
            biased;
            _ = crate::shutdown_requested(&mut shutdown) => break,
            report = rx.recv() => report,
        };
        let Some(report) = report else {
            break;
        };

        if let Err(e) = sink.report(&report).await {
            warn!(process_guid = %report.process_guid, error = %e, "Crash report dropped");
        }
    }

    info!("Crash report loop stopped");
}
