//! Monitor error types.

use intentflow_store::StoreError;

/// Unified error type for the monitor crate.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A provider fetch failed.  The poll loop logs it and carries on.
    #[error("provider `{provider}` failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("invalid monitor configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("transcription failed: {reason}")]
    Transcription { reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("monitor not found: {monitor_id}")]
    NotFound { monitor_id: String },
}

impl MonitorError {
    pub(crate) fn provider(provider: &str, reason: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the monitor crate.
pub type Result<T> = std::result::Result<T, MonitorError>;
