//! Execution records and the result returned to callers.
//!
//! A [`WorkflowExecution`] is the mutable run record of one workflow against
//! one event.  Status changes go through [`WorkflowExecution::transition`],
//! which enforces the execution state machine:
//!
//! ```text
//! pending ──> awaiting_approval ──> running ──> completed
//!    │               │                 │
//!    │               └──> cancelled    └──────> failed
//!    └──────────────────> running
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::workflow::Workflow;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    AwaitingApproval,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::AwaitingApproval => "awaiting_approval",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, AwaitingApproval)
                | (AwaitingApproval, Running)
                | (AwaitingApproval, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            other => Err(format!("unknown execution status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Machine-readable failure category carried on results and records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    StepFailed,
    Timeout,
    ApprovalRejected,
    /// Nobody decided before the pending approval expired.
    ApprovalExpired,
    InvalidToken,
    DuplicateExecution,
    WorkflowInactive,
    Internal,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Run state of one step inside an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl StepExecution {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }
}

/// The mutable run record of one workflow against one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub event_id: Uuid,
    pub user_id: String,
    pub status: ExecutionStatus,
    pub steps: Vec<StepExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// Incremented on every mutation; used for optimistic concurrency by
    /// persistent stores.
    #[serde(default)]
    pub version: u64,
}

impl WorkflowExecution {
    /// Create a `pending` record with one pending step entry per workflow step.
    pub fn new(workflow: &Workflow, event_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: workflow.id.clone(),
            event_id,
            user_id: user_id.into(),
            status: ExecutionStatus::Pending,
            steps: workflow
                .steps
                .iter()
                .map(|s| StepExecution::pending(s.id.clone()))
                .collect(),
            result: None,
            error: None,
            error_code: None,
            started_at: Utc::now(),
            completed_at: None,
            approved_at: None,
            approved_by: None,
            version: 1,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Record a mutation.
    pub fn touch(&mut self) {
        self.version += 1;
    }

    /// Move to `next`, enforcing the state machine.  Terminal states stamp
    /// `completedAt`.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                execution_id: self.id,
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Result boundary
// ---------------------------------------------------------------------------

/// What every caller of the engine receives.  The engine never surfaces raw
/// errors; failures are encoded here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

impl WorkflowResult {
    pub fn succeeded(execution_id: Uuid, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
            requires_approval: false,
            approval_token: None,
            next_steps: None,
            execution_id: Some(execution_id),
        }
    }

    pub fn failed(execution_id: Option<Uuid>, code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            error_code: Some(code),
            requires_approval: false,
            approval_token: None,
            next_steps: None,
            execution_id,
        }
    }

    pub fn awaiting_approval(
        execution_id: Uuid,
        token: String,
        message: String,
        next_steps: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            data: Some(serde_json::json!({
                "executionId": execution_id,
                "message": message,
            })),
            error: None,
            error_code: None,
            requires_approval: true,
            approval_token: Some(token),
            next_steps: Some(next_steps),
            execution_id: Some(execution_id),
        }
    }
}
