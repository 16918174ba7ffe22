use crate::error::ReportError;
use crate::metrics::Metrics;
use crate::state::Snapshot;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Best-effort delivery of snapshots to the collector endpoint.
#[derive(Clone)]
pub struct Reporter {
    client: Client,
    url: String,
    metrics: Arc<Metrics>,
}

impl Reporter {
    /// Every request carries `timeout`.
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ReportError> {
        let client = Client::builder()
            .user_agent(concat!("hoststatd/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(ReportError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
            metrics,
        })
    }

    pub async fn send(&self, snapshot: &Snapshot) -> Result<StatusCode, ReportError> {
        let body = serde_json::to_vec(snapshot)?;
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        // drain the body so the connection can be reused
        response.bytes().await?;
        if !status.is_success() {
            return Err(ReportError::Status(status));
        }
        Ok(status)
    }

    /// Sends on a detached task. The outcome is only visible in logs and the
    /// report counter; the caller never waits for it.
    pub fn spawn(&self, snapshot: Snapshot) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            match reporter.send(&snapshot).await {
                Ok(status) => {
                    reporter.metrics.inc_report("ok");
                    debug!(url = %reporter.url, status = %status, "snapshot reported");
                }
                Err(err) => {
                    reporter.metrics.inc_report("failed");
                    warn!(url = %reporter.url, error = %err, "report failed");
                }
            }
        })
    }
}
