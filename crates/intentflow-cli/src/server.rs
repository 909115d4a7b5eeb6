//! HTTP endpoint that receives approval decisions while `run` is active.
//!
//! Approval requests reach users through the configured notifier, carrying
//! the token.  The decision comes back here:
//!
//! - `POST /approvals/{token}` with `{"approved": bool, "approver": "..."}`
//!   returns the [`WorkflowResult`] of the decision.
//! - `GET /executions/{id}` returns an execution snapshot.
//! - `GET /health` reports liveness and the number of pending approvals.
//!
//! The token is the credential: it is 256 random bits and single-use.

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use intentflow_core::{ErrorCode, WorkflowResult};
use intentflow_engine::ExecutionEngine;

/// Body of an approval decision.
#[derive(Debug, Deserialize)]
pub struct Decision {
    pub approved: bool,
    #[serde(default)]
    pub approver: Option<String>,
}

pub fn router(engine: Arc<ExecutionEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/approvals/{token}", post(decide))
        .route("/executions/{id}", get(execution))
        .with_state(engine)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<ExecutionEngine>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "approval endpoint listening");
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(engine): State<Arc<ExecutionEngine>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "pendingApprovals": engine.pending_approvals(),
    }))
}

async fn decide(
    State(engine): State<Arc<ExecutionEngine>>,
    Path(token): Path<String>,
    Json(decision): Json<Decision>,
) -> (StatusCode, Json<WorkflowResult>) {
    let result = engine
        .approve_by(&token, decision.approved, decision.approver.as_deref())
        .await;
    let status = match result.error_code {
        Some(ErrorCode::InvalidToken) => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    (status, Json(result))
}

async fn execution(
    State(engine): State<Arc<ExecutionEngine>>,
    Path(id): Path<Uuid>,
) -> Response {
    match engine.get_execution_status(id).await {
        Some(execution) => Json(execution).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("execution {id} not found") })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use intentflow_core::{
        ExecutionStatus, Intent, StepConfig, StepType, UserContext, Workflow, WorkflowStep,
    };
    use intentflow_engine::{StepError, StepExecutor, StepScope};
    use serde_json::Value;
    use tokio::sync::oneshot;

    struct Succeed;

    #[async_trait]
    impl StepExecutor for Succeed {
        async fn execute(
            &self,
            _config: &StepConfig,
            _scope: &StepScope<'_>,
        ) -> Result<Value, StepError> {
            Ok(json!({"success": true}))
        }
    }

    async fn spawn(engine: Arc<ExecutionEngine>) -> (String, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(serve(listener, engine, async move {
            let _ = stopped.await;
        }));
        (base, stop)
    }

    async fn gated(engine: &ExecutionEngine) -> WorkflowResult {
        let config = json!({"message": "x"});
        let step = WorkflowStep::new("pay", "Pay", StepType::Notification, config);
        let workflow =
            Workflow::new("process-payment", "Pay", vec![step]).with_approval_required(true);
        let mut intent = Intent::fallback();
        intent.requires_approval = true;
        engine
            .execute(Arc::new(workflow), &intent, &UserContext::new("u1"), Uuid::now_v7())
            .await
    }

    #[tokio::test]
    async fn approval_over_http_runs_the_workflow() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(Succeed)));
        let pending = gated(&engine).await;
        let token = pending.approval_token.clone().unwrap();
        let (base, stop) = spawn(Arc::clone(&engine)).await;
        let http = reqwest::Client::new();

        let health: Value = http
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["pendingApprovals"], 1);

        let response = http
            .post(format!("{base}/approvals/{token}"))
            .json(&json!({"approved": true, "approver": "u1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let result: WorkflowResult = response.json().await.unwrap();
        assert!(result.success, "{result:?}");

        let id = pending.execution_id.unwrap();
        let snapshot: Value = http
            .get(format!("{base}/executions/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["approvedBy"], "u1");

        // Tokens are single-use.
        let again = http
            .post(format!("{base}/approvals/{token}"))
            .json(&json!({"approved": false}))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), reqwest::StatusCode::NOT_FOUND);
        let _ = stop.send(());
    }

    #[tokio::test]
    async fn rejection_over_http_cancels() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(Succeed)));
        let pending = gated(&engine).await;
        let (base, stop) = spawn(Arc::clone(&engine)).await;

        let url = format!("{base}/approvals/{}", pending.approval_token.unwrap());
        let result: WorkflowResult = reqwest::Client::new()
            .post(url)
            .json(&json!({"approved": false}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(result.error_code, Some(ErrorCode::ApprovalRejected));

        let id = pending.execution_id.unwrap();
        let status = engine.get_execution_status(id).await.unwrap().status;
        assert_eq!(status, ExecutionStatus::Cancelled);
        let _ = stop.send(());
    }

    #[tokio::test]
    async fn unknown_execution_is_not_found() {
        let engine = Arc::new(ExecutionEngine::new(Arc::new(Succeed)));
        let (base, stop) = spawn(engine).await;
        let response = reqwest::Client::new()
            .get(format!("{base}/executions/{}", Uuid::now_v7()))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let _ = stop.send(());
    }
}
