//! The provider seam: where raw items come from.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One item as a provider reports it, before normalization.
///
/// Providers fill in whatever they have; normalization decides which fields
/// matter for the monitor's event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawItem {
    /// External identifier, used for deduplication.
    #[serde(alias = "id")]
    pub source_id: Option<String>,
    pub body: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub audio_url: Option<String>,
    /// Transcript supplied by the provider, if it transcribes itself.
    pub transcript: Option<String>,
    pub duration_secs: Option<u64>,
    pub received_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
}

impl RawItem {
    pub fn new(source_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            body: Some(body.into()),
            ..Self::default()
        }
    }
}

/// A source of raw items for one monitor.
#[async_trait]
pub trait EventProvider: Send + Sync {
    /// Short name for logs and monitor listings.
    fn name(&self) -> &str;

    /// Items that arrived after `since`.  Providers that cannot filter may
    /// return older items too; the dedup ledger drops repeats.
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<RawItem>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_item_accepts_camel_case_and_id_alias() {
        let item: RawItem = serde_json::from_str(
            r#"{"id": "m-1", "from": "clinic@example.com", "audioUrl": "https://a/1.wav",
                "durationSecs": 42, "receivedAt": "2026-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(item.source_id.as_deref(), Some("m-1"));
        assert_eq!(item.audio_url.as_deref(), Some("https://a/1.wav"));
        assert_eq!(item.duration_secs, Some(42));
        assert!(item.body.is_none());
        assert!(item.metadata.is_empty());
    }
}
