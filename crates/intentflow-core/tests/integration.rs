//! Integration tests for the shared data model.

use intentflow_core::{
    EventSource, EventType, ExecutionStatus, Intent, IntentType, Priority, ResolveMode, StepConfig,
    StepType, TemplateScope, UserContext, Workflow, WorkflowExecution, WorkflowResult,
    resolve_value,
};
use serde_json::{Map, json};

#[test]
fn workflow_round_trips_through_json_definition() {
    let definition = json!({
        "id": "book-appointment",
        "name": "Book appointment",
        "trigger": {"type": "intent", "intentType": "appointment"},
        "approvalRequired": true,
        "retryPolicy": {"maxRetries": 2, "backoffMs": 50},
        "steps": [
            {
                "id": "book",
                "name": "Book slot",
                "type": "api_call",
                "config": {"url": "https://clinic.test/{context.userId}/book", "method": "POST"}
            },
            {
                "id": "notify",
                "name": "Tell the user",
                "type": "notification",
                "dependencies": ["book"],
                "config": {"message": "Booked {intent.doctor}: {result.book.data.ref}"}
            }
        ]
    });

    let workflow: Workflow = serde_json::from_value(definition).unwrap();
    workflow.validate().unwrap();
    assert_eq!(workflow.steps.len(), 2);
    assert_eq!(workflow.retry_policy.max_retries, 2);

    let mut intent = Intent::fallback();
    intent.intent_type = IntentType::Appointment;
    intent.parameters.insert("doctor".into(), json!("Dr. Okafor"));
    let context = UserContext::new("u-42");
    let mut results = Map::new();
    results.insert("book".into(), json!({"success": true, "data": {"ref": "R-7"}}));
    let scope = TemplateScope::new(&intent, &context, &results);

    let notify = workflow.step("notify").unwrap();
    let resolved = resolve_value(&notify.config, &scope, ResolveMode::Lenient).unwrap();
    match StepConfig::from_resolved(&notify.step_type, resolved).unwrap() {
        StepConfig::Notification(cfg) => assert_eq!(cfg.message, "Booked Dr. Okafor: R-7"),
        other => panic!("unexpected {other:?}"),
    }

    let book = workflow.step("book").unwrap();
    assert_eq!(book.step_type, StepType::ApiCall);
    let resolved = resolve_value(&book.config, &scope, ResolveMode::Strict).unwrap();
    assert_eq!(resolved["url"], "https://clinic.test/u-42/book");
}

#[test]
fn execution_lifecycle_follows_state_machine() {
    let workflow = Workflow::new("w", "w", vec![]);
    let event =
        EventSource::new("u1", EventType::Sms, "refill please").with_priority(Priority::High);
    let mut exec = WorkflowExecution::new(&workflow, event.id, &event.user_id);

    exec.transition(ExecutionStatus::AwaitingApproval).unwrap();
    assert!(exec.transition(ExecutionStatus::Completed).is_err());
    exec.transition(ExecutionStatus::Running).unwrap();
    exec.transition(ExecutionStatus::Completed).unwrap();

    assert!(exec.is_terminal());
    assert!(exec.completed_at.is_some());
    assert!(exec.transition(ExecutionStatus::Running).is_err());
}

#[test]
fn awaiting_approval_result_serializes_camel_case() {
    let id = uuid::Uuid::now_v7();
    let result =
        WorkflowResult::awaiting_approval(id, "tok".into(), "please".into(), vec!["a".into()]);
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["requiresApproval"], true);
    assert_eq!(value["approvalToken"], "tok");
    assert_eq!(value["nextSteps"], json!(["a"]));
    assert_eq!(value["data"]["message"], "please");
    assert!(value.get("errorCode").is_none());
}
