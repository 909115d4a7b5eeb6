//! The execution engine.
//!
//! [`ExecutionEngine`] runs one [`Workflow`] against one event:
//!
//! 1. Creates a `pending` [`WorkflowExecution`] with one pending entry per step.
//! 2. Suspends in `awaiting_approval` when the approval gate applies and
//!    returns an approval token; [`ExecutionEngine::approve`] later resumes or
//!    cancels the run.  Workflows that are not `autoExecute` always suspend.
//!    With an approval notifier attached the token is also sent to the user,
//!    and with an approval TTL [`ExecutionEngine::expire_approvals`] cancels
//!    requests nobody answered.
//! 3. Otherwise enters `running` and walks the steps in declared order.  Each
//!    step checks its own dependencies, resolves its placeholders, and is
//!    retried with linear backoff while its failures are retryable.
//! 4. Ends `completed` with the aggregate step results, or `failed` on the
//!    first step that exhausts its retries or when the workflow's timeout
//!    expires.
//!
//! Each execution record sits behind its own async mutex.  Only the task
//! driving the execution mutates it and it never holds the lock across a step,
//! so observers always read a consistent snapshot without waiting on I/O.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use intentflow_core::{
    ErrorCode, ExecutionStatus, Intent, ResolveMode, StepConfig, StepStatus, TemplateScope,
    UserContext, Workflow, WorkflowExecution, WorkflowResult, WorkflowStep, resolve_value,
};
use intentflow_intent::{IntentClassifier, fallback_approval_message};
use intentflow_store::ExecutionStore;

use crate::approval::{ApprovalRegistry, PendingApproval};
use crate::error::StepError;
use crate::executor::{StepExecutor, StepScope};
use crate::notify::{ApprovalRequest, Notification, Notifier};

/// How many persisted executions a user query reads back.
const USER_HISTORY_LIMIT: usize = 200;

type ExecutionHandle = Arc<Mutex<WorkflowExecution>>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// When a workflow flagged `approvalRequired` actually suspends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalGate {
    /// Only when the classified intent also asks for approval.
    #[default]
    WorkflowAndIntent,
    /// Whenever the workflow asks for approval.
    Workflow,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub approval_gate: ApprovalGate,
    /// Upper bound applied to every workflow's `timeoutMs`.
    pub max_timeout: Option<Duration>,
    /// How long a suspended execution waits for a decision.  `None` waits
    /// forever.
    pub approval_ttl: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

enum StepLoop {
    Completed(Map<String, Value>),
    Failed { step_id: String, error: StepError },
}

/// Runs workflows, holds their execution records, and brokers approvals.
pub struct ExecutionEngine {
    executor: Arc<dyn StepExecutor>,
    classifier: Option<IntentClassifier>,
    store: Option<ExecutionStore>,
    config: EngineConfig,
    approval_notifier: Option<Arc<dyn Notifier>>,
    executions: DashMap<Uuid, ExecutionHandle>,
    /// Active (non-terminal) execution per triggering event.
    active_events: DashMap<Uuid, Uuid>,
    approvals: ApprovalRegistry,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("executions", &self.executions.len())
            .field("pending_approvals", &self.approvals.len())
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            classifier: None,
            store: None,
            config: EngineConfig::default(),
            approval_notifier: None,
            executions: DashMap::new(),
            active_events: DashMap::new(),
            approvals: ApprovalRegistry::new(),
        }
    }

    /// Use the classifier to word approval requests.
    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Save a snapshot of every execution change.
    pub fn with_store(mut self, store: ExecutionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Send every approval request, token included, through `notifier`.
    pub fn with_approval_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.approval_notifier = Some(notifier);
        self
    }

    // -- Public API -------------------------------------------------------

    /// Start `workflow` for the event `event_id`.
    ///
    /// Returns once the execution finished, or immediately with an approval
    /// token when it has to wait for a decision.
    pub async fn execute(
        &self,
        workflow: Arc<Workflow>,
        intent: &Intent,
        context: &UserContext,
        event_id: Uuid,
    ) -> WorkflowResult {
        if !workflow.is_active {
            warn!(workflow_id = %workflow.id, "refusing to start inactive workflow");
            return WorkflowResult::failed(
                None,
                ErrorCode::WorkflowInactive,
                format!("workflow `{}` is not active", workflow.id),
            );
        }

        let token = if self.gate_applies(&workflow, intent) {
            match self.approvals.generate_token() {
                Ok(token) => Some(token),
                Err(err) => {
                    error!(workflow_id = %workflow.id, error = %err, "cannot issue approval token");
                    return WorkflowResult::failed(None, ErrorCode::Internal, err.to_string());
                }
            }
        } else {
            None
        };

        let execution = WorkflowExecution::new(&workflow, event_id, context.user_id.as_str());
        let execution_id = execution.id;
        match self.active_events.entry(event_id) {
            Entry::Occupied(active) => {
                let active = *active.get();
                warn!(
                    %event_id,
                    active_execution = %active,
                    "event already has an active execution"
                );
                return WorkflowResult::failed(
                    Some(active),
                    ErrorCode::DuplicateExecution,
                    format!("event {event_id} already has active execution {active}"),
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(execution_id);
            }
        }

        info!(
            %execution_id,
            workflow_id = %workflow.id,
            user_id = %context.user_id,
            %event_id,
            steps = workflow.steps.len(),
            "execution created"
        );
        let handle = Arc::new(Mutex::new(execution.clone()));
        self.executions.insert(execution_id, Arc::clone(&handle));
        self.persist(&execution).await;

        match token {
            Some(token) => self.suspend(&handle, workflow, intent, context, token).await,
            None => self.run(&handle, &workflow, intent, context).await,
        }
    }

    /// Decide on a suspended execution.
    pub async fn approve(&self, token: &str, approved: bool) -> WorkflowResult {
        self.approve_by(token, approved, None).await
    }

    /// Decide on a suspended execution, recording who decided.
    ///
    /// Approval runs the remaining steps and returns the final result.
    /// Rejection cancels the execution.  A token is only good for one call.
    pub async fn approve_by(
        &self,
        token: &str,
        approved: bool,
        approver: Option<&str>,
    ) -> WorkflowResult {
        let Some(pending) = self.approvals.take(token) else {
            warn!("approval decision for an unknown or already used token");
            return WorkflowResult::failed(
                None,
                ErrorCode::InvalidToken,
                "approval token is unknown or was already used",
            );
        };
        let execution_id = pending.execution_id;
        let Some(handle) = self.handle(execution_id) else {
            warn!(%execution_id, "approval token outlived its execution");
            return WorkflowResult::failed(
                Some(execution_id),
                ErrorCode::InvalidToken,
                "the execution for this token no longer exists",
            );
        };
        let approver = approver.map(str::to_string);

        if !approved {
            let rejected = self
                .update(&handle, |exec| {
                    exec.transition(ExecutionStatus::Cancelled)?;
                    exec.approved_by = approver.clone();
                    exec.error = Some("workflow execution was rejected".into());
                    exec.error_code = Some(ErrorCode::ApprovalRejected);
                    Ok::<_, intentflow_core::CoreError>(())
                })
                .await;
            self.release(&handle).await;
            if let Err(err) = rejected {
                error!(%execution_id, error = %err, "cannot cancel execution");
                return WorkflowResult::failed(
                    Some(execution_id),
                    ErrorCode::Internal,
                    err.to_string(),
                );
            }
            let approver = approver.as_deref().unwrap_or("-");
            info!(%execution_id, approver, "execution rejected");
            return WorkflowResult::failed(
                Some(execution_id),
                ErrorCode::ApprovalRejected,
                "workflow execution was rejected",
            );
        }

        self.update(&handle, |exec| {
            exec.approved_at = Some(Utc::now());
            exec.approved_by = approver.clone();
        })
        .await;
        info!(%execution_id, approver = approver.as_deref().unwrap_or("-"), "execution approved");
        self.run(&handle, &pending.workflow, &pending.intent, &pending.context).await
    }

    /// Snapshot of one execution, from memory or the attached store.
    pub async fn get_execution_status(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        if let Some(handle) = self.handle(execution_id) {
            return Some(handle.lock().await.clone());
        }
        let store = self.store.as_ref()?;
        match store.get(execution_id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(%execution_id, error = %err, "execution lookup failed");
                None
            }
        }
    }

    /// All executions of a user, newest first.
    pub async fn get_user_executions(&self, user_id: &str) -> Vec<WorkflowExecution> {
        let handles: Vec<ExecutionHandle> =
            self.executions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut out = Vec::new();
        for handle in handles {
            let exec = handle.lock().await;
            if exec.user_id == user_id {
                out.push(exec.clone());
            }
        }

        if let Some(store) = &self.store {
            match store.list_by_user(user_id, USER_HISTORY_LIMIT).await {
                Ok(stored) => {
                    let known: HashSet<Uuid> = out.iter().map(|e| e.id).collect();
                    out.extend(stored.into_iter().filter(|e| !known.contains(&e.id)));
                }
                Err(err) => warn!(user_id, error = %err, "failed to read persisted executions"),
            }
        }

        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }

    /// Drop terminal executions that finished more than `older_than` ago from
    /// memory.  Persisted snapshots are kept.
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let handles: Vec<(Uuid, ExecutionHandle)> = self
            .executions
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        let mut removed = 0;
        for (id, handle) in handles {
            // A locked record is being driven, so it is not finished.
            let Ok(exec) = handle.try_lock() else { continue };
            let expired = exec.is_terminal() && exec.completed_at.is_some_and(|at| at <= cutoff);
            drop(exec);
            if expired && self.executions.remove(&id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "purged finished executions");
        }
        removed
    }

    /// Number of executions waiting for a decision.
    pub fn pending_approvals(&self) -> usize {
        self.approvals.len()
    }

    /// Cancel executions whose approval request is older than the configured
    /// TTL.  Returns how many were cancelled.
    pub async fn expire_approvals(&self) -> usize {
        let Some(cutoff) = self
            .config
            .approval_ttl
            .and_then(|ttl| chrono::TimeDelta::from_std(ttl).ok())
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let mut expired = 0;
        for pending in self.approvals.take_expired(cutoff) {
            let execution_id = pending.execution_id;
            let Some(handle) = self.handle(execution_id) else {
                continue;
            };
            let cancelled = self
                .update(&handle, |exec| {
                    exec.transition(ExecutionStatus::Cancelled)?;
                    exec.error = Some("no approval decision before the request expired".into());
                    exec.error_code = Some(ErrorCode::ApprovalExpired);
                    Ok::<_, intentflow_core::CoreError>(())
                })
                .await;
            self.release(&handle).await;
            match cancelled {
                Ok(()) => {
                    info!(
                        %execution_id,
                        requested_at = %pending.requested_at,
                        "approval request expired"
                    );
                    expired += 1;
                }
                Err(err) => error!(%execution_id, error = %err, "cannot expire execution"),
            }
        }
        expired
    }

    // -- Lifecycle --------------------------------------------------------

    /// A workflow that must not run on its own always waits for a decision.
    fn gate_applies(&self, workflow: &Workflow, intent: &Intent) -> bool {
        if !workflow.auto_execute {
            return true;
        }
        workflow.approval_required
            && match self.config.approval_gate {
                ApprovalGate::WorkflowAndIntent => intent.requires_approval,
                ApprovalGate::Workflow => true,
            }
    }

    fn timeout_for(&self, workflow: &Workflow) -> Duration {
        match self.config.max_timeout {
            Some(max) => workflow.timeout().min(max),
            None => workflow.timeout(),
        }
    }

    async fn suspend(
        &self,
        handle: &ExecutionHandle,
        workflow: Arc<Workflow>,
        intent: &Intent,
        context: &UserContext,
        token: String,
    ) -> WorkflowResult {
        let execution_id = handle.lock().await.id;
        if let Err(err) = self
            .update(handle, |exec| exec.transition(ExecutionStatus::AwaitingApproval))
            .await
        {
            error!(%execution_id, error = %err, "cannot suspend execution");
            self.release(handle).await;
            return WorkflowResult::failed(
                Some(execution_id),
                ErrorCode::Internal,
                err.to_string(),
            );
        }

        let message = match &self.classifier {
            Some(classifier) => classifier.generate_approval_message(intent, &workflow.id).await,
            None => fallback_approval_message(intent, &workflow.id),
        };
        let next_steps: Vec<String> = workflow.steps.iter().map(|s| s.name.clone()).collect();
        let request = Notification {
            user_id: context.user_id.clone(),
            recipients: vec![context.user_id.clone()],
            channels: context.preferences.notification_channels.clone(),
            subject: Some(format!("Approval needed: {}", workflow.name)),
            message: message.clone(),
            approval: Some(ApprovalRequest {
                execution_id,
                workflow_id: workflow.id.clone(),
                approval_token: token.clone(),
                next_steps: next_steps.clone(),
            }),
        };

        self.approvals.insert(
            token.clone(),
            PendingApproval {
                execution_id,
                workflow,
                intent: intent.clone(),
                context: context.clone(),
                requested_at: Utc::now(),
            },
        );
        info!(%execution_id, "execution awaiting approval");

        if let Some(notifier) = &self.approval_notifier
            && let Err(err) = notifier.notify(&request).await
        {
            warn!(%execution_id, error = %err, "failed to deliver approval request");
        }
        WorkflowResult::awaiting_approval(execution_id, token, message, next_steps)
    }

    /// Enter `running`, drive the steps under the workflow timeout, and settle
    /// the terminal state.
    async fn run(
        &self,
        handle: &ExecutionHandle,
        workflow: &Workflow,
        intent: &Intent,
        context: &UserContext,
    ) -> WorkflowResult {
        let (execution_id, approved, approved_by) = {
            let exec = handle.lock().await;
            (exec.id, exec.approved_at.is_some(), exec.approved_by.clone())
        };
        if let Err(err) = self
            .update(handle, |exec| exec.transition(ExecutionStatus::Running))
            .await
        {
            error!(%execution_id, error = %err, "cannot start execution");
            self.release(handle).await;
            return WorkflowResult::failed(
                Some(execution_id),
                ErrorCode::Internal,
                err.to_string(),
            );
        }

        let budget = self.timeout_for(workflow);
        info!(%execution_id, timeout_ms = budget.as_millis() as u64, "execution running");

        let scope = StepScope {
            execution_id,
            step_id: "",
            context,
            approved,
            approved_by: approved_by.as_deref(),
        };
        let steps = self.run_steps(handle, workflow, intent, &scope);
        let outcome = tokio::time::timeout(budget, steps).await;

        let result = match outcome {
            Ok(StepLoop::Completed(results)) => {
                let data = Value::Object(results);
                let settled = self
                    .update(handle, |exec| {
                        exec.result = Some(data.clone());
                        exec.transition(ExecutionStatus::Completed)
                    })
                    .await;
                if let Err(err) = settled {
                    error!(%execution_id, error = %err, "cannot complete execution");
                }
                info!(%execution_id, "execution completed");
                WorkflowResult::succeeded(execution_id, data)
            }
            Ok(StepLoop::Failed { step_id, error }) => {
                let message = format!("step `{step_id}` failed: {error}");
                let settled = self
                    .update(handle, |exec| {
                        exec.error = Some(message.clone());
                        exec.error_code = Some(ErrorCode::StepFailed);
                        exec.transition(ExecutionStatus::Failed)
                    })
                    .await;
                if let Err(err) = settled {
                    error!(%execution_id, error = %err, "cannot fail execution");
                }
                error!(%execution_id, %step_id, error = %message, "execution failed");
                WorkflowResult::failed(Some(execution_id), ErrorCode::StepFailed, message)
            }
            Err(_) => {
                let message = format!("execution exceeded its timeout of {}ms", budget.as_millis());
                let settled = self
                    .update(handle, |exec| {
                        let now = Utc::now();
                        if let Some(step) = exec.steps.iter_mut().find(|s| {
                            s.status == StepStatus::Running
                                || (s.status == StepStatus::Pending && s.retry_count > 0)
                        }) {
                            step.status = StepStatus::Failed;
                            step.error = Some(message.clone());
                            step.completed_at = Some(now);
                        }
                        exec.error = Some(message.clone());
                        exec.error_code = Some(ErrorCode::Timeout);
                        exec.transition(ExecutionStatus::Failed)
                    })
                    .await;
                if let Err(err) = settled {
                    error!(%execution_id, error = %err, "cannot fail execution");
                }
                error!(
                    %execution_id,
                    timeout_ms = budget.as_millis() as u64,
                    "execution timed out"
                );
                WorkflowResult::failed(Some(execution_id), ErrorCode::Timeout, message)
            }
        };

        self.release(handle).await;
        result
    }

    /// Walk the steps in declared order.
    async fn run_steps(
        &self,
        handle: &ExecutionHandle,
        workflow: &Workflow,
        intent: &Intent,
        base: &StepScope<'_>,
    ) -> StepLoop {
        let execution_id = base.execution_id;
        let mut results = Map::new();

        for step in &workflow.steps {
            let unmet = {
                let exec = handle.lock().await;
                step.dependencies
                    .iter()
                    .find(|dep| !dependency_satisfied(&exec, &results, dep))
                    .cloned()
            };
            if let Some(dependency) = unmet {
                debug!(
                    %execution_id,
                    step_id = %step.id,
                    %dependency,
                    "dependency not satisfied, skipping step"
                );
                self.update(handle, |exec| {
                    if let Some(s) = exec.step_mut(&step.id) {
                        s.status = StepStatus::Skipped;
                        s.completed_at = Some(Utc::now());
                    }
                })
                .await;
                continue;
            }

            let policy = workflow.retry_policy_for(step);
            let scope = StepScope {
                step_id: &step.id,
                ..*base
            };
            let mut retry_count = 0;

            loop {
                self.update(handle, |exec| {
                    if let Some(s) = exec.step_mut(&step.id) {
                        s.status = StepStatus::Running;
                        s.started_at.get_or_insert_with(Utc::now);
                    }
                })
                .await;
                debug!(
                    %execution_id,
                    step_id = %step.id,
                    step_type = %step.step_type,
                    attempt = retry_count + 1,
                    "running step"
                );

                match self.attempt(step, intent, &results, &scope).await {
                    Ok(value) => {
                        results.insert(step.id.clone(), value.clone());
                        self.update(handle, |exec| {
                            if let Some(s) = exec.step_mut(&step.id) {
                                s.status = StepStatus::Completed;
                                s.result = Some(value);
                                s.error = None;
                                s.completed_at = Some(Utc::now());
                            }
                        })
                        .await;
                        debug!(%execution_id, step_id = %step.id, retry_count, "step completed");
                        break;
                    }
                    Err(err) if err.is_retryable() && retry_count < policy.max_retries => {
                        retry_count += 1;
                        let delay = policy.backoff_for(retry_count);
                        warn!(
                            %execution_id,
                            step_id = %step.id,
                            retry_count,
                            max_retries = policy.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "step failed, retrying"
                        );
                        self.update(handle, |exec| {
                            if let Some(s) = exec.step_mut(&step.id) {
                                s.status = StepStatus::Pending;
                                s.retry_count = retry_count;
                                s.error = Some(err.to_string());
                            }
                        })
                        .await;
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) => {
                        self.update(handle, |exec| {
                            if let Some(s) = exec.step_mut(&step.id) {
                                s.status = StepStatus::Failed;
                                s.error = Some(err.to_string());
                                s.completed_at = Some(Utc::now());
                            }
                        })
                        .await;
                        return StepLoop::Failed {
                            step_id: step.id.clone(),
                            error: err,
                        };
                    }
                }
            }
        }

        StepLoop::Completed(results)
    }

    /// One attempt: resolve placeholders, decode the typed config, execute.
    async fn attempt(
        &self,
        step: &WorkflowStep,
        intent: &Intent,
        results: &Map<String, Value>,
        scope: &StepScope<'_>,
    ) -> Result<Value, StepError> {
        let mode = if step.strict_placeholders {
            ResolveMode::Strict
        } else {
            ResolveMode::Lenient
        };
        let template_scope = TemplateScope::new(intent, scope.context, results);
        let resolved = resolve_value(&step.config, &template_scope, mode)?;
        let config = StepConfig::from_resolved(&step.step_type, resolved)?;
        self.executor.execute(&config, scope).await
    }

    // -- Bookkeeping ------------------------------------------------------

    fn handle(&self, execution_id: Uuid) -> Option<ExecutionHandle> {
        self.executions.get(&execution_id).map(|e| Arc::clone(e.value()))
    }

    /// Mutate an execution under its lock, then persist the new snapshot.
    async fn update<R>(
        &self,
        handle: &ExecutionHandle,
        f: impl FnOnce(&mut WorkflowExecution) -> R,
    ) -> R {
        let (out, snapshot) = {
            let mut exec = handle.lock().await;
            let out = f(&mut exec);
            exec.touch();
            (out, exec.clone())
        };
        self.persist(&snapshot).await;
        out
    }

    async fn persist(&self, snapshot: &WorkflowExecution) {
        if let Some(store) = &self.store
            && let Err(err) = store.save(snapshot).await
        {
            warn!(
                execution_id = %snapshot.id,
                version = snapshot.version,
                error = %err,
                "failed to persist execution snapshot"
            );
        }
    }

    /// Free the event slot and any token of a finished execution.
    async fn release(&self, handle: &ExecutionHandle) {
        let (execution_id, event_id) = {
            let exec = handle.lock().await;
            (exec.id, exec.event_id)
        };
        self.active_events.remove_if(&event_id, |_, active| *active == execution_id);
        self.approvals.forget_execution(execution_id);
    }
}

/// A dependency is met once its step completed with a result that does not
/// report `success: false`.
fn dependency_satisfied(
    exec: &WorkflowExecution,
    results: &Map<String, Value>,
    dependency: &str,
) -> bool {
    let completed = exec
        .step(dependency)
        .is_some_and(|s| s.status == StepStatus::Completed);
    let reported_failure = results
        .get(dependency)
        .and_then(|r| r.get("success"))
        .and_then(Value::as_bool)
        == Some(false);
    completed && !reported_failure
}
