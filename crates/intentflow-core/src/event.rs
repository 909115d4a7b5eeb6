//! Normalized external events.
//!
//! An [`EventSource`] is built by a monitor from one provider payload and is
//! never mutated afterwards.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of external source an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Email,
    Voicemail,
    Calendar,
    Webhook,
    Sms,
    Notification,
}

impl EventType {
    /// Stable lowercase name, used in dedup keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Voicemail => "voicemail",
            Self::Calendar => "calendar",
            Self::Webhook => "webhook",
            Self::Sms => "sms",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "voicemail" => Ok(Self::Voicemail),
            "calendar" => Ok(Self::Calendar),
            "webhook" => Ok(Self::Webhook),
            "sms" => Ok(Self::Sms),
            "notification" => Ok(Self::Notification),
            other => Err(format!("unknown event type `{other}`")),
        }
    }
}

/// Triage priority assigned by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// One normalized external occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    /// External identifier used for deduplication, when the provider has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub priority: Priority,
}

impl EventSource {
    /// Create an event with a fresh id, the current timestamp and
    /// `medium` priority.
    pub fn new(
        user_id: impl Into<String>,
        event_type: EventType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            content: content.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            source_id: None,
            priority: Priority::Medium,
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The key monitors deduplicate on, if the event carries an external id.
    pub fn dedup_key(&self) -> Option<DedupKey> {
        self.source_id
            .as_deref()
            .map(|sid| DedupKey::new(self.user_id.as_str(), self.event_type, sid))
    }
}

/// Identity of one external item: `(userId, type, sourceId)`.
///
/// The parts stay separate; source ids may contain any character,
/// including the `:` used by its `Display` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub user_id: String,
    pub event_type: EventType,
    pub source_id: String,
}

impl DedupKey {
    pub fn new(
        user_id: impl Into<String>,
        event_type: EventType,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_type,
            source_id: source_id.into(),
        }
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.user_id, self.event_type, self.source_id)
    }
}
