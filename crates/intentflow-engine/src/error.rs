//! Engine error types.
//!
//! [`EngineError`] covers setup and collaborator failures (catalog loading,
//! notification delivery, token generation).  [`StepError`] is what a step
//! executor returns; it decides whether the engine may retry.  Neither ever
//! crosses the public engine API, which speaks [`WorkflowResult`] only.
//!
//! [`WorkflowResult`]: intentflow_core::WorkflowResult

use intentflow_core::CoreError;
use intentflow_intent::IntentError;
use intentflow_store::StoreError;

/// Unified error type for the engine crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("intent error: {0}")]
    Intent(#[from] IntentError),

    /// A workflow definition file could not be read.
    #[error("cannot read workflow catalog {path}: {reason}")]
    CatalogIo { path: String, reason: String },

    /// A workflow definition file could not be parsed.
    #[error("cannot parse workflow catalog {path}: {reason}")]
    CatalogParse { path: String, reason: String },

    /// Two definitions share one workflow id.
    #[error("duplicate workflow id `{workflow_id}`")]
    DuplicateWorkflow { workflow_id: String },

    /// A notifier could not deliver a notification.
    #[error("notification delivery failed: {reason}")]
    Notification { reason: String },

    /// The system random source failed.
    #[error("failed to generate approval token")]
    TokenGeneration,
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure of a single step attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// The resolved configuration cannot be used.  Never retried.
    #[error("invalid step configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The step type has no executor.  Never retried.
    #[error("unknown step type `{step_type}`")]
    UnknownType { step_type: String },

    /// The attempt failed in a way another attempt may fix.
    #[error("{reason}")]
    Failed { reason: String },

    /// The attempt failed and repeating it cannot help.
    #[error("{reason}")]
    Rejected { reason: String },
}

impl StepError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig { reason: reason.into() }
    }

    /// Whether the engine may spend a retry on this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl From<CoreError> for StepError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownStepType { step_type } => Self::UnknownType { step_type },
            other => Self::InvalidConfig {
                reason: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::Failed {
                reason: err.to_string(),
            }
        } else {
            Self::Rejected {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_permanent() {
        let err: StepError = CoreError::UnknownStepType {
            step_type: "fax".into(),
        }
        .into();
        assert_eq!(err, StepError::UnknownType { step_type: "fax".into() });
        assert!(!err.is_retryable());

        let err: StepError = CoreError::MissingPlaceholder {
            namespace: "intent".into(),
            key: "date".into(),
        }
        .into();
        assert!(matches!(err, StepError::InvalidConfig { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn runtime_failures_are_retryable() {
        assert!(StepError::failed("HTTP 503").is_retryable());
        assert!(!StepError::Rejected { reason: "nope".into() }.is_retryable());
    }
}
