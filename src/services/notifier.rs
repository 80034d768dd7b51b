//! Mentor-request notifications
//!
//! Fired when the matchmaker finds nobody to pair with. Delivery is best
//! effort: callers spawn the send and never wait on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{ImpactError, Result};

/// A student on a task with no available peer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorRequest {
    pub user_id: String,
    pub display_name: String,
    pub task_id: String,
    pub task_title: String,
    pub requested_at: DateTime<Utc>,
}

#[async_trait]
pub trait MentorNotifier: Send + Sync {
    async fn mentor_requested(&self, request: MentorRequest) -> Result<()>;
}

/// Writes the request to the log. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl MentorNotifier for LogNotifier {
    async fn mentor_requested(&self, request: MentorRequest) -> Result<()> {
        info!(
            user = %request.user_id,
            task = %request.task_id,
            "Mentor requested"
        );
        Ok(())
    }
}

/// POSTs the request as JSON to a webhook
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ImpactError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl MentorNotifier for WebhookNotifier {
    async fn mentor_requested(&self, request: MentorRequest) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ImpactError::Transient(format!("Webhook send failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImpactError::Transient(format!(
                "Webhook returned {status}"
            )));
        }

        debug!(user = %request.user_id, task = %request.task_id, "Mentor request delivered");
        Ok(())
    }
}
