//! Notification delivery for `notification` steps and approval requests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// A resolved notification, ready to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: String,
    pub recipients: Vec<String>,
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    /// Set when the notification asks the user to decide on a suspended
    /// execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
}

/// What a user needs to approve or reject a suspended execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub approval_token: String,
    pub next_steps: Vec<String>,
}

/// Delivers notifications somewhere.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!(
            user_id = %notification.user_id,
            recipients = ?notification.recipients,
            channels = ?notification.channels,
            subject = notification.subject.as_deref().unwrap_or(""),
            message = %notification.message,
            execution_id = ?notification.approval.as_ref().map(|a| a.execution_id),
            approval_token = notification
                .approval
                .as_ref()
                .map(|a| a.approval_token.as_str())
                .unwrap_or(""),
            "notification"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: url::Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let url = url::Url::parse(url).map_err(|e| EngineError::Notification {
            reason: format!("invalid webhook url `{url}`: {e}"),
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Notification {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let response = self
            .http
            .post(self.url.clone())
            .json(notification)
            .send()
            .await
            .map_err(|e| EngineError::Notification { reason: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Notification {
                reason: format!("webhook returned HTTP {status}"),
            });
        }
        debug!(url = %self.url, "notification delivered");
        Ok(())
    }
}
