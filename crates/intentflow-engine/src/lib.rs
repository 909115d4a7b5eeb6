//! Workflow execution for intentflow.
//!
//! - **Executors**: [`executor::StepExecutor`] and the built-in
//!   [`executor::DefaultStepExecutor`] for `api_call`, `data_update`,
//!   `notification`, `approval` and `ai_processing` steps.
//! - **Engine**: [`engine::ExecutionEngine`] drives executions through the
//!   approval gate, retries, dependency checks, and the workflow timeout.
//! - **Catalog**: [`catalog::WorkflowCatalog`] loads validated workflow
//!   definitions from JSON or TOML.
//! - **Pipeline**: [`pipeline::Pipeline`] turns one event into at most one
//!   execution.

pub mod approval;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod executor;
pub mod notify;
pub mod pipeline;

pub use approval::{ApprovalRegistry, PendingApproval};
pub use catalog::{CatalogFormat, WorkflowCatalog};
pub use engine::{ApprovalGate, EngineConfig, ExecutionEngine};
pub use error::{EngineError, Result, StepError};
pub use executor::{DefaultStepExecutor, StepExecutor, StepScope};
pub use notify::{ApprovalRequest, LogNotifier, Notification, Notifier, WebhookNotifier};
pub use pipeline::{
    ContextProvider, HaltReason, Pipeline, PipelineOutcome, StaticContextProvider,
};
