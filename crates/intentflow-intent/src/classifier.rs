//! Intent classifier: one event + user context in, one [`Intent`] out.
//!
//! The classifier asks a [`TextGenerator`] for a JSON object matching the
//! intent schema and validates the reply strictly.  Classification never
//! fails from the caller's point of view: any [`ClassificationError`] is
//! logged and replaced by [`Intent::fallback`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use intentflow_agent::TextGenerator;
use intentflow_core::{EventSource, Impact, Intent, IntentType, UserContext};

use crate::error::{ClassificationError, Result};

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You classify incoming events for a personal automation assistant.

Respond ONLY with one JSON object of exactly this shape:
{
  "type": "appointment" | "prescription" | "claim" | "payment" | "notification" | "general",
  "confidence": number between 0 and 1,
  "entities": { "name": value, ... },
  "action": "snake_case_action_name",
  "parameters": { "name": value, ... },
  "requiresApproval": true | false,
  "estimatedImpact": "low" | "medium" | "high"
}

Set requiresApproval to true whenever the action spends money, shares
medical or financial data, or commits the user to something."#;

const APPROVAL_SYSTEM_PROMPT: &str = "You write one or two plain sentences asking a user to \
approve an automated action. Name the action and what it will do. No preamble, no markdown.";

const PROCESS_SYSTEM_PROMPT: &str = "You are a data processing assistant inside an automation \
workflow. When the task asks for structured output, respond with a single JSON object.";

// ---------------------------------------------------------------------------
// Reply schema
// ---------------------------------------------------------------------------

/// The exact shape a classification reply must have.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentReply {
    #[serde(rename = "type")]
    intent_type: IntentType,
    confidence: f64,
    entities: HashMap<String, Value>,
    action: String,
    parameters: HashMap<String, Value>,
    requires_approval: bool,
    estimated_impact: Impact,
}

impl IntentReply {
    fn into_intent(self) -> std::result::Result<Intent, ClassificationError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ClassificationError::InvalidShape {
                reason: format!("confidence {} outside [0, 1]", self.confidence),
            });
        }
        let action = self.action.trim();
        if action.is_empty() {
            return Err(ClassificationError::InvalidShape {
                reason: "empty action".into(),
            });
        }

        Ok(Intent {
            id: Uuid::now_v7(),
            intent_type: self.intent_type,
            confidence: self.confidence,
            entities: self.entities,
            action: action.to_string(),
            parameters: self.parameters,
            requires_approval: self.requires_approval,
            estimated_impact: self.estimated_impact,
        })
    }
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Byte length of the brace-balanced object at the start of `s`, which must
/// begin with `{`.  Braces inside JSON strings are ignored.
fn balanced_object_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find the first JSON object embedded in free text (prose, code fences).
///
/// Candidates are tried in order of their opening brace; the first one that
/// parses wins.  Returns [`ClassificationError::NoJson`] when the text has no
/// opening brace and [`ClassificationError::InvalidJson`] when candidates
/// exist but none parse.
pub fn extract_json_object(
    text: &str,
) -> std::result::Result<Map<String, Value>, ClassificationError> {
    let mut first_error: Option<String> = None;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let Some(len) = balanced_object_len(&text[start..]) else {
            first_error.get_or_insert_with(|| "unterminated JSON object".into());
            break;
        };

        match serde_json::from_str::<Value>(&text[start..start + len]) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => {}
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
        search_from = start + 1;
    }

    match first_error {
        Some(reason) => Err(ClassificationError::InvalidJson { reason }),
        None => Err(ClassificationError::NoJson),
    }
}

/// Strictly parse a classification reply into an [`Intent`].
pub fn parse_intent_reply(reply: &str) -> std::result::Result<Intent, ClassificationError> {
    let object = extract_json_object(reply)?;
    let parsed: IntentReply = serde_json::from_value(Value::Object(object)).map_err(|e| {
        ClassificationError::InvalidShape {
            reason: e.to_string(),
        }
    })?;
    parsed.into_intent()
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Turns events into intents through a text generator.
#[derive(Clone)]
pub struct IntentClassifier {
    generator: Arc<dyn TextGenerator>,
}

impl std::fmt::Debug for IntentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentClassifier").finish_non_exhaustive()
    }
}

impl IntentClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Classify an event.  Always returns an intent; unusable replies
    /// degrade to [`Intent::fallback`].
    pub async fn classify(&self, event: &EventSource, context: &UserContext) -> Intent {
        match self.try_classify(event, context).await {
            Ok(intent) => {
                info!(
                    event_id = %event.id,
                    intent_type = %intent.intent_type,
                    action = %intent.action,
                    confidence = intent.confidence,
                    "event classified"
                );
                intent
            }
            Err(err) => {
                warn!(
                    event_id = %event.id,
                    error = %err,
                    "classification degraded to fallback intent"
                );
                Intent::fallback()
            }
        }
    }

    /// Classify an event, reporting why the reply was unusable instead of
    /// falling back.
    pub async fn try_classify(
        &self,
        event: &EventSource,
        context: &UserContext,
    ) -> std::result::Result<Intent, ClassificationError> {
        let prompt = build_classification_prompt(event, context);
        debug!(event_id = %event.id, prompt_len = prompt.len(), "requesting classification");

        let reply = self
            .generator
            .generate(CLASSIFY_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| ClassificationError::Generation {
                reason: e.to_string(),
            })?;

        parse_intent_reply(&reply)
    }

    /// Best-effort human-readable explanation of why approval is needed.
    pub async fn generate_approval_message(&self, intent: &Intent, workflow_id: &str) -> String {
        let parameters = serde_json::to_string(&intent.parameters).unwrap_or_default();
        let prompt = format!(
            "Workflow: {workflow_id}\nRequest type: {}\nAction: {}\nParameters: {parameters}\n\
             Estimated impact: {:?}",
            intent.intent_type, intent.action, intent.estimated_impact,
        );

        match self.generator.generate(APPROVAL_SYSTEM_PROMPT, &prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_approval_message(intent, workflow_id),
            Err(err) => {
                warn!(
                    workflow_id,
                    error = %err,
                    "approval message generation failed; using fallback"
                );
                fallback_approval_message(intent, workflow_id)
            }
        }
    }

    /// Run a free-form prompt and return its structured response: the first
    /// JSON object in the reply, or `{"text": reply}` when there is none.
    pub async fn process_prompt(&self, prompt: &str) -> Result<Value> {
        let reply = self.generator.generate(PROCESS_SYSTEM_PROMPT, prompt).await?;
        Ok(match extract_json_object(&reply) {
            Ok(object) => Value::Object(object),
            Err(_) => json!({ "text": reply }),
        })
    }
}

/// The static approval message used when generation is unavailable.
pub fn fallback_approval_message(intent: &Intent, workflow_id: &str) -> String {
    format!(
        "Approval required to run workflow '{workflow_id}' for a {} request (action: {}).",
        intent.intent_type, intent.action
    )
}

/// Render the user prompt for one event.
pub fn build_classification_prompt(event: &EventSource, context: &UserContext) -> String {
    let metadata = serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".into());
    let auto_approve =
        serde_json::to_string(&context.preferences.auto_approve).unwrap_or_else(|_| "{}".into());

    let mut prompt = format!(
        "Event type: {}\nPriority: {:?}\nReceived: {}\n\nContent:\n{}\n\n\
         Metadata: {metadata}\n\n\
         User preferences:\n- auto-approve: {auto_approve}\n- notification channels: {}",
        event.event_type,
        event.priority,
        event.timestamp.to_rfc3339(),
        event.content,
        if context.preferences.notification_channels.is_empty() {
            "none".to_string()
        } else {
            context.preferences.notification_channels.join(", ")
        },
    );
    if let Some(hours) = &context.preferences.working_hours {
        prompt.push_str(&format!(
            "\n- working hours: {}-{} {}",
            hours.start, hours.end, hours.timezone
        ));
    }
    prompt
}
