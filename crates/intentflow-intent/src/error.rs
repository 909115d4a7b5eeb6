//! Intent error types.
//!
//! [`ClassificationError`] describes why a model reply could not become an
//! [`Intent`](intentflow_core::Intent); the classifier recovers from every
//! variant by returning the fallback intent.  [`IntentError`] is returned by
//! the operations that do propagate, such as free-form prompt processing.

use intentflow_agent::AgentError;

/// Why a classification reply was unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassificationError {
    /// The reply contains no `{...}` object at all.
    #[error("no JSON object in model reply")]
    NoJson,

    /// A brace-balanced object was found but is not valid JSON.
    #[error("invalid JSON in model reply: {reason}")]
    InvalidJson { reason: String },

    /// The JSON is valid but does not match the intent schema.
    #[error("intent JSON has the wrong shape: {reason}")]
    InvalidShape { reason: String },

    /// The text generator itself failed.
    #[error("generation failed: {reason}")]
    Generation { reason: String },
}

/// Unified error type for the intent crate.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    /// The text generator failed.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// A classification reply could not be interpreted.
    #[error("classification failed: {0}")]
    Classification(#[from] ClassificationError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
