//! Classifier and selector working together.

use std::sync::Arc;

use async_trait::async_trait;
use intentflow_agent::{AgentError, TextGenerator};
use intentflow_core::{AutoApprove, EventSource, EventType, IntentType, Permissions, UserContext};
use intentflow_intent::{IntentClassifier, SelectionDenied, WorkflowSelector};

/// Replies with a fixed text regardless of the prompt.
struct Fixed(&'static str);

#[async_trait]
impl TextGenerator for Fixed {
    async fn generate(&self, _system: &str, _prompt: &str) -> intentflow_agent::Result<String> {
        if self.0.is_empty() {
            return Err(AgentError::LlmRequestFailed {
                reason: "offline".into(),
            });
        }
        Ok(self.0.to_string())
    }
}

const APPOINTMENT: &str = r#"{"type": "appointment", "confidence": 0.9,
    "entities": {"doctor": "Dr. Lee", "when": "Friday 2pm"},
    "action": "schedule_appointment", "parameters": {"doctor": "Dr. Lee"},
    "requiresApproval": true, "estimatedImpact": "medium"}"#;

fn email() -> EventSource {
    EventSource::new(
        "u1",
        EventType::Email,
        "please schedule an appointment with Dr. Lee for Friday 2pm",
    )
}

fn context(auto_approve_appointments: bool) -> UserContext {
    UserContext::new("u1")
        .with_permissions(Permissions {
            can_schedule_appointments: true,
            ..Permissions::default()
        })
        .with_auto_approve(AutoApprove {
            appointments: auto_approve_appointments,
            ..AutoApprove::default()
        })
}

#[tokio::test]
async fn appointment_with_auto_approve_selects_workflow() {
    let classifier = IntentClassifier::new(Arc::new(Fixed(APPOINTMENT)));
    let ctx = context(true);

    let intent = classifier.classify(&email(), &ctx).await;
    assert_eq!(intent.intent_type, IntentType::Appointment);

    let selected = WorkflowSelector::new().select(&intent, &ctx);
    assert_eq!(selected.as_deref(), Some("schedule-appointment"));
}

#[tokio::test]
async fn appointment_without_auto_approve_selects_nothing() {
    let classifier = IntentClassifier::new(Arc::new(Fixed(APPOINTMENT)));
    let ctx = context(false);

    let intent = classifier.classify(&email(), &ctx).await;
    assert!(intent.requires_approval);
    assert_eq!(
        WorkflowSelector::new().evaluate(&intent, &ctx),
        Err(SelectionDenied::AutoExecuteDisallowed {
            intent_type: IntentType::Appointment
        })
    );
}

#[tokio::test]
async fn every_reply_yields_a_valid_intent() {
    let replies = [
        APPOINTMENT,
        "",
        "nothing useful",
        r#"{"type": "payment", "confidence": -0.2}"#,
        r#"{"type": "payment", "confidence": 7, "entities": {}, "action": "pay",
            "parameters": {}, "requiresApproval": false, "estimatedImpact": "high"}"#,
        "{{{{",
    ];

    for reply in replies {
        let classifier = IntentClassifier::new(Arc::new(Fixed(reply)));
        let intent = classifier.classify(&email(), &context(true)).await;
        assert!((0.0..=1.0).contains(&intent.confidence), "reply {reply:?}");
        assert!(IntentType::ALL.contains(&intent.intent_type));
    }
}
