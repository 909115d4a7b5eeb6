//! Raw item → [`EventSource`].

use serde_json::Value;

use intentflow_core::{EventSource, EventType};

use crate::priority::PriorityHeuristic;
use crate::provider::RawItem;

/// Build the event for one raw item.
///
/// Returns `None` for a voicemail without a transcript; the caller is
/// expected to have transcribed it already.
pub fn normalize(
    user_id: &str,
    event_type: EventType,
    item: RawItem,
    priority: &PriorityHeuristic,
) -> Option<EventSource> {
    let RawItem {
        source_id,
        body,
        from,
        subject,
        audio_url,
        transcript,
        duration_secs,
        received_at,
        metadata,
    } = item;

    let mut standard: Vec<(&str, Value)> = Vec::new();
    let content = match event_type {
        EventType::Email => {
            let subject = subject.unwrap_or_default();
            let content = format!("Subject: {subject}\n\n{}", body.unwrap_or_default());
            if let Some(from) = from {
                standard.push(("from", from.into()));
            }
            standard.push(("subject", subject.into()));
            content
        }
        EventType::Voicemail => {
            let transcript = transcript?;
            if let Some(caller) = from {
                standard.push(("caller", caller.into()));
            }
            if let Some(url) = audio_url {
                standard.push(("audioUrl", url.into()));
            }
            if let Some(secs) = duration_secs {
                standard.push(("durationSecs", secs.into()));
            }
            transcript
        }
        _ => {
            if let Some(from) = from {
                standard.push(("from", from.into()));
            }
            body.unwrap_or_default()
        }
    };

    let assessed = priority.assess(&content);
    let mut event = EventSource::new(user_id, event_type, content).with_priority(assessed);
    event.metadata = metadata;
    for (key, value) in standard {
        event.metadata.insert(key.to_string(), value);
    }
    event.source_id = source_id;
    if let Some(at) = received_at {
        event.timestamp = at;
    }
    Some(event)
}
