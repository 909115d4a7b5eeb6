//! Shared data model for intentflow.
//!
//! This crate provides:
//!
//! - **Events**: normalized external occurrences ([`event::EventSource`]).
//! - **Intents**: classified interpretations of events ([`intent::Intent`]).
//! - **Workflows**: declarative step definitions and their typed step
//!   configuration ([`workflow::Workflow`], [`workflow::StepConfig`]).
//! - **Executions**: the run record state machine and the caller-facing
//!   [`execution::WorkflowResult`].
//! - **Templates**: `{namespace.key}` placeholder resolution for step
//!   configuration ([`template`]).

pub mod context;
pub mod error;
pub mod event;
pub mod execution;
pub mod intent;
pub mod template;
pub mod workflow;

pub use context::{
    AutoApprove, HistoryEntry, Permissions, Preferences, UserContext, WorkingHours,
};
pub use error::{CoreError, Result};
pub use event::{DedupKey, EventSource, EventType, Priority};
pub use execution::{
    ErrorCode, ExecutionStatus, StepExecution, StepStatus, WorkflowExecution, WorkflowResult,
};
pub use intent::{Impact, Intent, IntentType};
pub use template::{ResolveMode, Template, TemplateScope, resolve_str, resolve_value};
pub use workflow::{
    AiProcessingConfig, ApiCallConfig, ApprovalConfig, DataOperation, DataUpdateConfig,
    NotificationConfig, RetryPolicy, StepConfig, StepType, Trigger, Workflow, WorkflowStep,
};
