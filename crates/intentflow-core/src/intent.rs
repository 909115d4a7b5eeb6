//! Structured interpretation of an event's purpose.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The six intent categories the classifier may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Appointment,
    Prescription,
    Claim,
    Payment,
    Notification,
    General,
}

impl IntentType {
    /// Every variant, in declaration order.
    pub const ALL: [IntentType; 6] = [
        Self::Appointment,
        Self::Prescription,
        Self::Claim,
        Self::Payment,
        Self::Notification,
        Self::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::Prescription => "prescription",
            Self::Claim => "claim",
            Self::Payment => "payment",
            Self::Notification => "notification",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much an action would affect the user if it went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
}

/// A classified intent.  Produced once per event, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    /// Always within `0.0..=1.0`.
    pub confidence: f64,
    #[serde(default)]
    pub entities: HashMap<String, Value>,
    pub action: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    pub requires_approval: bool,
    pub estimated_impact: Impact,
}

impl Intent {
    /// The degraded intent used whenever classification output is unusable.
    pub fn fallback() -> Self {
        Self {
            id: Uuid::now_v7(),
            intent_type: IntentType::General,
            confidence: 0.5,
            entities: HashMap::new(),
            action: "send_notification".into(),
            parameters: HashMap::new(),
            requires_approval: true,
            estimated_impact: Impact::Medium,
        }
    }

    /// Look up a value by key, preferring `parameters` and then the intent's
    /// own fields.  Dotted keys descend into nested objects.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let (head, rest) = split_path(key);
        if let Some(v) = self.parameters.get(head) {
            return descend(v, rest).cloned();
        }
        let root = match head {
            "id" => Value::String(self.id.to_string()),
            "type" => Value::String(self.intent_type.as_str().into()),
            "action" => Value::String(self.action.clone()),
            "confidence" => serde_json::json!(self.confidence),
            "requiresApproval" => Value::Bool(self.requires_approval),
            "entities" => serde_json::to_value(&self.entities).ok()?,
            "parameters" => serde_json::to_value(&self.parameters).ok()?,
            _ => return None,
        };
        descend(&root, rest).cloned()
    }
}

/// Split `a.b.c` into `("a", Some("b.c"))`.
pub(crate) fn split_path(key: &str) -> (&str, Option<&str>) {
    match key.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (key, None),
    }
}

/// Walk a dotted path through nested JSON objects and arrays.
pub(crate) fn descend<'a>(value: &'a Value, path: Option<&str>) -> Option<&'a Value> {
    let Some(path) = path else {
        return Some(value);
    };
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
