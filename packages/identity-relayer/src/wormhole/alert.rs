//! Where terminal wormhole failures are reported.

use std::time::Duration;
use tracing::error;

#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), crate::Error>;
}

/// Slack-style incoming webhook: `{"text": ...}`.
pub struct WebhookAlertSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: &str) -> Result<Self, crate::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| crate::Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, text: &str) -> Result<(), crate::Error> {
        self.http
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| crate::Error::Rpc(format!("alert webhook: {e}")))?;
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct LogAlertSink;

#[async_trait::async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, text: &str) -> Result<(), crate::Error> {
        error!(alert = %text, "Wormhole transfer alert");
        Ok(())
    }
}
