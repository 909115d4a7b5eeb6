//! Declarative workflow definitions.
//!
//! Workflows are supplied as data (JSON or TOML) and interpreted by the
//! execution engine.  A step's `config` is kept as raw JSON until run time:
//! placeholders are resolved first, and only then is the result decoded into
//! the typed [`StepConfig`] matching the step's [`StepType`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::event::EventType;
use crate::intent::IntentType;

/// Default wall-clock budget for one execution.
pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry policy with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_count` (1-based): `backoffMs * retryCount`.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(retry_count)))
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// What class of input a workflow is meant for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Trigger {
    /// Started explicitly by a caller.
    #[default]
    Manual,
    /// Started for intents of a given category.
    Intent {
        #[serde(rename = "intentType")]
        intent_type: IntentType,
    },
    /// Started for events from a given source type.
    Event {
        #[serde(rename = "eventType")]
        event_type: EventType,
    },
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Intent { intent_type } => write!(f, "intent({intent_type})"),
            Self::Event { event_type } => write!(f, "event({event_type})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Step types
// ---------------------------------------------------------------------------

/// The declared type of a step.
///
/// Unrecognized names are preserved as [`StepType::Unknown`] so that a
/// workflow still loads; only the offending step fails when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    ApiCall,
    DataUpdate,
    Notification,
    Approval,
    AiProcessing,
    Unknown(String),
}

impl StepType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ApiCall => "api_call",
            Self::DataUpdate => "data_update",
            Self::Notification => "notification",
            Self::Approval => "approval",
            Self::AiProcessing => "ai_processing",
            Self::Unknown(name) => name,
        }
    }

    /// Whether running this step touches the outside world.
    pub fn has_side_effects(&self) -> bool {
        matches!(self, Self::ApiCall | Self::DataUpdate | Self::Notification)
    }
}

impl From<String> for StepType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "api_call" => Self::ApiCall,
            "data_update" => Self::DataUpdate,
            "notification" => Self::Notification,
            "approval" => Self::Approval,
            "ai_processing" => Self::AiProcessing,
            _ => Self::Unknown(value),
        }
    }
}

impl From<StepType> for String {
    fn from(value: StepType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Typed step configuration
// ---------------------------------------------------------------------------

fn default_method() -> String {
    "GET".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON bodies are sent as `application/json`; strings are sent verbatim.
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOperation {
    Create,
    Update,
    Upsert,
    Delete,
}

impl DataOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUpdateConfig {
    pub model: String,
    pub operation: DataOperation,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(alias = "template")]
    pub message: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalConfig {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProcessingConfig {
    #[serde(alias = "promptTemplate")]
    pub prompt: String,
}

/// Resolved, typed configuration of one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    ApiCall(ApiCallConfig),
    DataUpdate(DataUpdateConfig),
    Notification(NotificationConfig),
    Approval(ApprovalConfig),
    AiProcessing(AiProcessingConfig),
}

impl StepConfig {
    /// Decode a placeholder-resolved JSON config for the given step type.
    pub fn from_resolved(step_type: &StepType, value: Value) -> Result<Self> {
        let invalid = |e: serde_json::Error| CoreError::InvalidStepConfig {
            step_type: step_type.to_string(),
            reason: e.to_string(),
        };
        let value = if value.is_null() {
            Value::Object(Default::default())
        } else {
            value
        };

        match step_type {
            StepType::ApiCall => serde_json::from_value(value).map(Self::ApiCall).map_err(invalid),
            StepType::DataUpdate => serde_json::from_value(value)
                .map(Self::DataUpdate)
                .map_err(invalid),
            StepType::Notification => serde_json::from_value(value)
                .map(Self::Notification)
                .map_err(invalid),
            StepType::Approval => serde_json::from_value(value)
                .map(Self::Approval)
                .map_err(invalid),
            StepType::AiProcessing => serde_json::from_value(value)
                .map(Self::AiProcessing)
                .map_err(invalid),
            StepType::Unknown(name) => Err(CoreError::UnknownStepType {
                step_type: name.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Raw configuration; string values may contain placeholders.
    #[serde(default)]
    pub config: Value,
    /// Ids of steps that must complete successfully before this one runs.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Fail the step instead of substituting `""` for unknown placeholders.
    #[serde(default)]
    pub strict_placeholders: bool,
}

impl WorkflowStep {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        step_type: StepType,
        config: Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type,
            config,
            dependencies: Vec::new(),
            retry_policy: None,
            strict_placeholders: false,
        }
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: Trigger,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub approval_required: bool,
    /// When false, every run waits for an approval decision before its first step.
    pub auto_execute: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            trigger: Trigger::Manual,
            steps,
            approval_required: false,
            auto_execute: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_policy: RetryPolicy::default(),
            is_active: true,
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.approval_required = required;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The step's own retry policy, else the workflow default.
    pub fn retry_policy_for(&self, step: &WorkflowStep) -> RetryPolicy {
        step.retry_policy.unwrap_or(self.retry_policy)
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Check structural invariants: non-empty unique step ids, dependencies
    /// naming steps of this workflow, and a non-zero timeout.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| CoreError::InvalidWorkflow {
            workflow_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("workflow id is empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeoutMs must be greater than zero".into()));
        }

        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(invalid(format!("step `{}` has an empty id", step.name)));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id `{}`", step.id)));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(invalid(format!("step `{}` depends on itself", step.id)));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "step `{}` depends on unknown step `{dep}`",
                        step.id
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_step() -> Workflow {
        Workflow::new(
            "wf",
            "Two step",
            vec![
                WorkflowStep::new("a", "A", StepType::ApiCall, json!({"url": "http://x"})),
                WorkflowStep::new("b", "B", StepType::Notification, json!({"message": "hi"}))
                    .depends_on("a"),
            ],
        )
    }

    #[test]
    fn unknown_step_type_survives_deserialization() {
        let step: WorkflowStep =
            serde_json::from_value(json!({"id": "x", "name": "X", "type": "fax_send"})).unwrap();
        assert_eq!(step.step_type, StepType::Unknown("fax_send".into()));
        assert_eq!(serde_json::to_value(&step).unwrap()["type"], "fax_send");
    }

    #[test]
    fn step_config_rejects_unknown_type() {
        let fax = StepType::Unknown("fax".into());
        let err = StepConfig::from_resolved(&fax, json!({})).unwrap_err();
        assert!(matches!(err, CoreError::UnknownStepType { .. }));
    }

    #[test]
    fn step_config_decodes_api_call_defaults() {
        let cfg =
            StepConfig::from_resolved(&StepType::ApiCall, json!({"url": "https://a.b"})).unwrap();
        match cfg {
            StepConfig::ApiCall(api) => {
                assert_eq!(api.method, "GET");
                assert!(api.headers.is_empty());
                assert!(api.body.is_none());
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn step_config_reports_missing_fields() {
        let err =
            StepConfig::from_resolved(&StepType::DataUpdate, json!({"model": "m"})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStepConfig { .. }));
    }

    #[test]
    fn approval_config_accepts_null() {
        let cfg = StepConfig::from_resolved(&StepType::Approval, Value::Null).unwrap();
        assert_eq!(cfg, StepConfig::Approval(ApprovalConfig::default()));
    }

    #[test]
    fn validate_accepts_well_formed_workflow() {
        assert!(two_step().validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_and_dangling_ids() {
        let mut wf = two_step();
        wf.steps[1].id = "a".into();
        assert!(wf.validate().is_err());

        let mut wf = two_step();
        wf.steps[1].dependencies = vec!["ghost".into()];
        assert!(wf.validate().is_err());

        let mut wf = two_step();
        wf.timeout_ms = 0;
        assert!(wf.validate().is_err());
    }

    #[test]
    fn step_policy_overrides_workflow_policy() {
        let mut wf = two_step();
        wf.steps[0].retry_policy = Some(RetryPolicy {
            max_retries: 7,
            backoff_ms: 5,
        });
        assert_eq!(wf.retry_policy_for(&wf.steps[0]).max_retries, 7);
        assert_eq!(wf.retry_policy_for(&wf.steps[1]), RetryPolicy::default());
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_ms: 100,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
    }

    #[test]
    fn workflow_defaults_from_minimal_json() {
        let wf: Workflow = serde_json::from_value(json!({
            "id": "w", "name": "W", "steps": []
        }))
        .unwrap();
        assert!(wf.is_active);
        assert!(wf.auto_execute);
        assert!(!wf.approval_required);
        assert_eq!(wf.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(wf.trigger, Trigger::Manual);
    }

    #[test]
    fn trigger_serializes_tagged() {
        let t = Trigger::Intent {
            intent_type: IntentType::Claim,
        };
        assert_eq!(
            serde_json::to_value(&t).unwrap(),
            json!({"type": "intent", "intentType": "claim"})
        );
    }
}
