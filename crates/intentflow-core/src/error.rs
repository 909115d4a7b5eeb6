//! Core error types.
//!
//! Validation of workflow definitions, step configuration decoding, and
//! strict template resolution all surface errors through [`CoreError`].

/// Unified error type for the shared data model.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // -- Workflow definition errors -------------------------------------------
    /// A workflow definition is structurally invalid.
    #[error("invalid workflow `{workflow_id}`: {reason}")]
    InvalidWorkflow { workflow_id: String, reason: String },

    /// A step's resolved configuration does not match its declared type.
    #[error("invalid config for step type `{step_type}`: {reason}")]
    InvalidStepConfig { step_type: String, reason: String },

    /// The step type is not one the engine knows how to run.
    #[error("unknown step type `{step_type}`")]
    UnknownStepType { step_type: String },

    // -- Execution errors -----------------------------------------------------
    /// The execution state machine does not allow this status change.
    #[error("execution {execution_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        execution_id: uuid::Uuid,
        from: &'static str,
        to: &'static str,
    },

    // -- Template errors ------------------------------------------------------
    /// A placeholder referenced a key that has no value in strict mode.
    #[error("unresolved placeholder `{{{namespace}.{key}}}`")]
    MissingPlaceholder { namespace: String, key: String },

    // -- Serialization --------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
