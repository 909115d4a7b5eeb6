//! Voicemail transcription.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{MonitorError, Result};

/// Turns a recording into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct TranscriptionReply {
    text: String,
}

/// Calls a transcription service: `POST {"audioUrl": ...}` answered by
/// `{"text": ...}`.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    http: reqwest::Client,
    endpoint: url::Url,
    api_key: Option<String>,
}

impl HttpTranscriber {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint).map_err(|e| MonitorError::InvalidConfig {
            reason: format!("invalid transcription endpoint `{endpoint}`: {e}"),
        })?;
        let http = reqwest::Client::builder()
            .user_agent("intentflow-monitor/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| MonitorError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            endpoint,
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio_url: &str) -> Result<String> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .json(&json!({ "audioUrl": audio_url }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::Transcription { reason: e.to_string() })?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Transcription {
                reason: format!("transcription service returned HTTP {status}"),
            });
        }

        let reply: TranscriptionReply = response.json().await.map_err(|e| {
            MonitorError::Transcription {
                reason: format!("malformed transcription reply: {e}"),
            }
        })?;
        debug!(%audio_url, chars = reply.text.len(), "voicemail transcribed");
        Ok(reply.text)
    }
}
