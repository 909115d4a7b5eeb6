//! The per-event pipeline: classify, select, look up, execute.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use intentflow_core::{EventSource, Intent, UserContext, WorkflowResult};
use intentflow_intent::{IntentClassifier, SelectionDenied, WorkflowSelector};

use crate::catalog::WorkflowCatalog;
use crate::engine::ExecutionEngine;

/// Supplies the [`UserContext`] an event is evaluated against.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn context_for(&self, user_id: &str) -> UserContext;
}

/// Contexts fixed at startup.  Unknown users get an empty context, which
/// grants no permissions.
#[derive(Debug, Clone, Default)]
pub struct StaticContextProvider {
    users: HashMap<String, UserContext>,
}

impl StaticContextProvider {
    pub fn new(contexts: impl IntoIterator<Item = UserContext>) -> Self {
        Self {
            users: contexts.into_iter().map(|c| (c.user_id.clone(), c)).collect(),
        }
    }

    pub fn insert(&mut self, context: UserContext) {
        self.users.insert(context.user_id.clone(), context);
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn context_for(&self, user_id: &str) -> UserContext {
        self.users
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserContext::new(user_id))
    }
}

/// Why an event did not start an execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HaltReason {
    #[error(transparent)]
    Denied(#[from] SelectionDenied),

    #[error("workflow `{workflow_id}` is not in the catalog")]
    UnknownWorkflow { workflow_id: String },

    #[error("workflow `{workflow_id}` is inactive")]
    Inactive { workflow_id: String },
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Executed {
        intent: Intent,
        workflow_id: String,
        result: WorkflowResult,
    },
    Halted {
        intent: Intent,
        reason: HaltReason,
    },
}

impl PipelineOutcome {
    pub fn intent(&self) -> &Intent {
        match self {
            Self::Executed { intent, .. } | Self::Halted { intent, .. } => intent,
        }
    }

    pub fn result(&self) -> Option<&WorkflowResult> {
        match self {
            Self::Executed { result, .. } => Some(result),
            Self::Halted { .. } => None,
        }
    }
}

/// Classifier → selector → catalog → engine.
///
/// Workflows that are not `autoExecute` still reach the engine, which holds
/// them at the approval gate.
pub struct Pipeline {
    classifier: IntentClassifier,
    selector: WorkflowSelector,
    catalog: Arc<WorkflowCatalog>,
    engine: Arc<ExecutionEngine>,
    contexts: Arc<dyn ContextProvider>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workflows", &self.catalog.len())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        classifier: IntentClassifier,
        selector: WorkflowSelector,
        catalog: Arc<WorkflowCatalog>,
        engine: Arc<ExecutionEngine>,
        contexts: Arc<dyn ContextProvider>,
    ) -> Self {
        Self {
            classifier,
            selector,
            catalog,
            engine,
            contexts,
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn selector(&self) -> &WorkflowSelector {
        &self.selector
    }

    pub async fn context_for(&self, user_id: &str) -> UserContext {
        self.contexts.context_for(user_id).await
    }

    /// Run one event through the pipeline.  Halts are logged, never raised.
    pub async fn process(&self, event: &EventSource) -> PipelineOutcome {
        let context = self.contexts.context_for(&event.user_id).await;
        let intent = self.classifier.classify(event, &context).await;

        let halt = |intent: Intent, reason: HaltReason| {
            info!(
                event_id = %event.id,
                user_id = %event.user_id,
                intent_type = %intent.intent_type,
                reason = %reason,
                "pipeline halted"
            );
            PipelineOutcome::Halted { intent, reason }
        };

        let workflow_id = match self.selector.evaluate(&intent, &context) {
            Ok(id) => id.to_string(),
            Err(denied) => return halt(intent, denied.into()),
        };
        let Some(workflow) = self.catalog.get(&workflow_id) else {
            warn!(%workflow_id, "selected workflow has no definition");
            return halt(intent, HaltReason::UnknownWorkflow { workflow_id });
        };
        if !workflow.is_active {
            return halt(intent, HaltReason::Inactive { workflow_id });
        }

        let result = self
            .engine
            .execute(workflow, &intent, &context, event.id)
            .await;
        info!(
            event_id = %event.id,
            %workflow_id,
            success = result.success,
            requires_approval = result.requires_approval,
            "event processed"
        );
        PipelineOutcome::Executed {
            intent,
            workflow_id,
            result,
        }
    }
}
