//! Failure and pass-summary notification sinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::error::{RefreshError, Result};
use crate::ports::{FailureNotice, Notifier};
use crate::scheduler::PassSummary;

/// Pick the sink for `config`: a webhook when a URL is set, else the log.
pub fn from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    match config.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(Arc::new(WebhookNotifier::new(
            url,
            Duration::from_secs(config.timeout_secs),
        )?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}

/// Writes notifications to the tracing log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_failure(&self, notice: &FailureNotice) -> Result<()> {
        warn!(
            profile_id = notice.profile_id,
            username = %notice.username,
            executed_at = %notice.executed_at,
            detail = %notice.detail,
            "profile update failed"
        );
        Ok(())
    }

    async fn notify_summary(&self, summary: &PassSummary) -> Result<()> {
        info!(
            dispatched = summary.dispatched,
            success = summary.success,
            no_change = summary.no_change,
            failure = summary.failure,
            skipped = summary.skipped,
            "maintenance pass summary"
        );
        Ok(())
    }
}

/// POSTs a JSON document per notification to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RefreshError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, body: serde_json::Value) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RefreshError::Notify(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RefreshError::Notify(format!("webhook returned {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_failure(&self, notice: &FailureNotice) -> Result<()> {
        self.post(json!({
            "event": "run_failed",
            "profile_id": notice.profile_id,
            "username": notice.username,
            "executed_at": notice.executed_at,
            "detail": notice.detail,
        }))
        .await
    }

    async fn notify_summary(&self, summary: &PassSummary) -> Result<()> {
        self.post(json!({
            "event": "pass_summary",
            "summary": summary,
        }))
        .await
    }
}
