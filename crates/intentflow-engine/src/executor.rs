//! Step executors.
//!
//! A [`StepExecutor`] performs the side effect of one step, given its
//! placeholder-resolved, typed [`StepConfig`].  The engine owns retries,
//! timeouts, and bookkeeping; executors only report success (a JSON result
//! stored under the step id) or a [`StepError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use intentflow_core::{
    AiProcessingConfig, ApiCallConfig, DataUpdateConfig, NotificationConfig, StepConfig,
    UserContext,
};
use intentflow_intent::IntentClassifier;
use intentflow_store::RecordStore;

use crate::error::StepError;
use crate::notify::{Notification, Notifier};

/// Default timeout for `api_call` steps that do not set `timeoutMs`.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies are cut to this many bytes in error messages.
const ERROR_BODY_PREVIEW: usize = 256;

/// What an executor may know about the run it is part of.
#[derive(Debug, Clone, Copy)]
pub struct StepScope<'a> {
    pub execution_id: Uuid,
    pub step_id: &'a str,
    pub context: &'a UserContext,
    pub approved: bool,
    pub approved_by: Option<&'a str>,
}

/// Performs one step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, config: &StepConfig, scope: &StepScope<'_>) -> Result<Value, StepError>;
}

// ---------------------------------------------------------------------------
// Default executor
// ---------------------------------------------------------------------------

/// Executor for the built-in step types.
#[derive(Clone)]
pub struct DefaultStepExecutor {
    http: reqwest::Client,
    records: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    classifier: Option<IntentClassifier>,
}

impl std::fmt::Debug for DefaultStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultStepExecutor")
            .field("ai_processing", &self.classifier.is_some())
            .finish_non_exhaustive()
    }
}

impl DefaultStepExecutor {
    pub fn new(records: Arc<dyn RecordStore>, notifier: Arc<dyn Notifier>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("intentflow/", env!("CARGO_PKG_VERSION")))
            .timeout(DEFAULT_API_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            records,
            notifier,
            classifier: None,
        }
    }

    /// Enable `ai_processing` steps.
    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    async fn api_call(&self, config: &ApiCallConfig) -> Result<Value, StepError> {
        let url = url::Url::parse(&config.url)
            .map_err(|e| StepError::invalid(format!("invalid url `{}`: {e}", config.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StepError::invalid(format!(
                "unsupported url scheme `{}`",
                url.scheme()
            )));
        }
        let method = config.method.trim().to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| StepError::invalid(format!("invalid HTTP method `{}`", config.method)))?;

        let mut request = self.http.request(method.clone(), url.clone());
        for (name, value) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StepError::invalid(format!("invalid header name `{name}`: {e}")))?;
            let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                StepError::invalid(format!("invalid value for header `{name}`: {e}"))
            })?;
            request = request.header(name, value);
        }
        match &config.body {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) => request = request.json(body),
        }
        if let Some(ms) = config.timeout_ms {
            request = request.timeout(Duration::from_millis(ms));
        }

        debug!(method = %method, url = %url, "sending api_call request");
        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| StepError::failed(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StepError::failed(format!("failed to read response from {url}: {e}")))?;
        debug!(
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "api_call response"
        );

        if !status.is_success() {
            let preview: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(StepError::failed(format!("HTTP {status} from {url}: {preview}")));
        }

        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(json!({
            "success": true,
            "status": status.as_u16(),
            "data": data,
        }))
    }

    async fn data_update(&self, config: &DataUpdateConfig) -> Result<Value, StepError> {
        let summary = self
            .records
            .apply(&config.model, config.operation, config.id.as_deref(), &config.data)
            .await?;
        let mut out = match summary {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("record".into(), other);
                map
            }
        };
        out.insert("success".into(), Value::Bool(true));
        Ok(Value::Object(out))
    }

    async fn notification(
        &self,
        config: &NotificationConfig,
        scope: &StepScope<'_>,
    ) -> Result<Value, StepError> {
        let recipients = if config.recipients.is_empty() {
            vec![scope.context.user_id.clone()]
        } else {
            config.recipients.clone()
        };
        let channels = if config.channels.is_empty() {
            scope.context.preferences.notification_channels.clone()
        } else {
            config.channels.clone()
        };
        let notification = Notification {
            user_id: scope.context.user_id.clone(),
            recipients,
            channels,
            subject: config.subject.clone(),
            message: config.message.clone(),
            approval: None,
        };

        self.notifier
            .notify(&notification)
            .await
            .map_err(|e| StepError::failed(e.to_string()))?;
        Ok(json!({
            "success": true,
            "recipients": notification.recipients,
            "channels": notification.channels,
        }))
    }

    async fn ai_processing(&self, config: &AiProcessingConfig) -> Result<Value, StepError> {
        let Some(classifier) = &self.classifier else {
            return Err(StepError::Rejected {
                reason: "ai_processing requires an AI capability, none is configured".into(),
            });
        };
        let response = classifier.process_prompt(&config.prompt).await.map_err(|e| {
            warn!(error = %e, "ai_processing attempt failed");
            StepError::failed(e.to_string())
        })?;
        Ok(json!({ "success": true, "response": response }))
    }
}

#[async_trait]
impl StepExecutor for DefaultStepExecutor {
    async fn execute(
        &self,
        config: &StepConfig,
        scope: &StepScope<'_>,
    ) -> Result<Value, StepError> {
        match config {
            StepConfig::ApiCall(c) => self.api_call(c).await,
            StepConfig::DataUpdate(c) => self.data_update(c).await,
            StepConfig::Notification(c) => self.notification(c, scope).await,
            StepConfig::AiProcessing(c) => self.ai_processing(c).await,
            StepConfig::Approval(_) => Ok(json!({
                "success": true,
                "approved": scope.approved,
                "approvedBy": scope.approved_by,
            })),
        }
    }
}
