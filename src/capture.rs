//! Capture normalization.
//!
//! Page integrations hand over a raw [`CapturedContent`]; this module turns
//! it into a [`NewCommunication`] ready for the situation repository. How a
//! page is scraped is the business of each [`CaptureSource`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{CommunicationMetadata, CommunicationSource, NewCommunication};

/// Longest content kept from a single capture, in characters.
pub const MAX_CAPTURE_CHARS: usize = 5000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("nothing selected: make a fresh selection and capture again")]
    EmptySelection,
}

/// Raw capture as produced by a page integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedContent {
    pub source: Option<CommunicationSource>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub participants: Vec<String>,
    /// ISO-8601; absent or unreadable means "now".
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Something that can produce a capture from whatever the user has
/// selected. Returns `None` when there is no usable selection.
pub trait CaptureSource {
    fn capture_selection(&self) -> Option<CapturedContent>;
}

/// Text typed or pasted by the user directly.
#[derive(Debug, Clone)]
pub struct ManualCapture {
    pub text: String,
    pub participants: Vec<String>,
    pub url: Option<String>,
}

impl CaptureSource for ManualCapture {
    fn capture_selection(&self) -> Option<CapturedContent> {
        if self.text.trim().is_empty() {
            return None;
        }
        Some(CapturedContent {
            source: Some(CommunicationSource::Manual),
            source_id: None,
            url: self.url.clone(),
            content: self.text.clone(),
            participants: self.participants.clone(),
            timestamp: None,
            metadata: BTreeMap::new(),
        })
    }
}

pub fn normalize(capture: CapturedContent, now: DateTime<Utc>) -> Result<NewCommunication, CaptureError> {
    let content = capture.content.trim();
    if content.is_empty() {
        return Err(CaptureError::EmptySelection);
    }

    let source = capture.source.unwrap_or(CommunicationSource::Manual);
    let timestamp = capture
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(now);
    let source_id = capture
        .source_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("{}-{}", source, now.timestamp_millis()));
    let participants = capture
        .participants
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    Ok(NewCommunication {
        source,
        source_id,
        source_url: capture.url.filter(|url| !url.is_empty()),
        timestamp,
        participants,
        content: truncate_chars(content, MAX_CAPTURE_CHARS).to_string(),
        metadata: typed_metadata(source, capture.metadata),
    })
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Map free-form capture metadata onto the variant for `source`. Fields the
/// variant does not know about send the whole map to `Generic`.
fn typed_metadata(source: CommunicationSource, fields: BTreeMap<String, Value>) -> CommunicationMetadata {
    let known: &[&str] = match source {
        CommunicationSource::Slack => &["channel", "channelId", "threadId", "isThread"],
        CommunicationSource::Gmail => &["subject", "threadId"],
        CommunicationSource::Zoom => &["duration"],
        CommunicationSource::Manual => &[],
    };
    let meaningful: BTreeMap<String, Value> = fields
        .into_iter()
        .filter(|(_, value)| !is_blank(value))
        .collect();
    if meaningful.keys().any(|key| !known.contains(&key.as_str())) {
        return CommunicationMetadata::Generic { fields: meaningful };
    }

    let text = |key: &str| {
        meaningful
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    match source {
        CommunicationSource::Slack => CommunicationMetadata::Slack {
            channel: text("channel"),
            channel_id: text("channelId"),
            thread_id: text("threadId"),
            is_thread: meaningful
                .get("isThread")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        CommunicationSource::Gmail => CommunicationMetadata::Gmail {
            subject: text("subject"),
            thread_id: text("threadId"),
        },
        CommunicationSource::Zoom => CommunicationMetadata::Zoom {
            duration: meaningful.get("duration").and_then(Value::as_u64),
        },
        CommunicationSource::Manual => CommunicationMetadata::Manual,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slack_capture(content: &str) -> CapturedContent {
        let mut metadata = BTreeMap::new();
        metadata.insert("channel".to_string(), json!("vendor-deals"));
        metadata.insert("channelId".to_string(), json!("C0123"));
        metadata.insert("threadId".to_string(), json!(""));
        metadata.insert("isThread".to_string(), json!(false));
        CapturedContent {
            source: Some(CommunicationSource::Slack),
            source_id: Some("1717171717.000100".to_string()),
            url: Some("https://app.slack.com/client/T1/C0123".to_string()),
            content: content.to_string(),
            participants: vec!["Alex".to_string(), " ".to_string()],
            timestamp: Some("2026-03-02T15:04:05Z".to_string()),
            metadata,
        }
    }

    #[test]
    fn blank_selections_are_refused() {
        let now = Utc::now();
        assert_eq!(
            normalize(slack_capture("   \n"), now),
            Err(CaptureError::EmptySelection)
        );
        assert!(ManualCapture {
            text: " ".to_string(),
            participants: Vec::new(),
            url: None,
        }
        .capture_selection()
        .is_none());
    }

    #[test]
    fn slack_capture_gets_typed_metadata() {
        let normalized = normalize(slack_capture(" Can we extend the deadline? "), Utc::now()).unwrap();
        assert_eq!(normalized.content, "Can we extend the deadline?");
        assert_eq!(normalized.participants, vec!["Alex".to_string()]);
        assert_eq!(normalized.timestamp.to_rfc3339(), "2026-03-02T15:04:05+00:00");
        assert_eq!(
            normalized.metadata,
            CommunicationMetadata::Slack {
                channel: Some("vendor-deals".to_string()),
                channel_id: Some("C0123".to_string()),
                thread_id: None,
                is_thread: false,
            }
        );
    }

    #[test]
    fn missing_timestamp_and_source_id_default_to_capture_instant() {
        let now = Utc::now();
        let mut capture = slack_capture("hello");
        capture.timestamp = None;
        capture.source_id = None;

        let normalized = normalize(capture, now).unwrap();
        assert_eq!(normalized.timestamp, now);
        assert_eq!(normalized.source_id, format!("slack-{}", now.timestamp_millis()));
    }

    #[test]
    fn unreadable_timestamp_falls_back_to_now() {
        let now = Utc::now();
        let mut capture = slack_capture("hello");
        capture.timestamp = Some("yesterday-ish".to_string());
        assert_eq!(normalize(capture, now).unwrap().timestamp, now);
    }

    #[test]
    fn content_is_capped_on_a_char_boundary() {
        let long = "é".repeat(MAX_CAPTURE_CHARS + 10);
        let normalized = normalize(slack_capture(&long), Utc::now()).unwrap();
        assert_eq!(normalized.content.chars().count(), MAX_CAPTURE_CHARS);
    }

    #[test]
    fn unexpected_fields_fall_back_to_generic() {
        let mut capture = slack_capture("hello");
        capture.source = Some(CommunicationSource::Gmail);
        match normalize(capture, Utc::now()).unwrap().metadata {
            CommunicationMetadata::Generic { fields } => {
                assert_eq!(fields["channel"], "vendor-deals");
                assert!(!fields.contains_key("threadId"));
            }
            other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[test]
    fn manual_capture_normalizes_to_manual_source() {
        let capture = ManualCapture {
            text: "Call notes: budget approved".to_string(),
            participants: vec!["Sam".to_string()],
            url: None,
        }
        .capture_selection()
        .unwrap();
        let normalized = normalize(capture, Utc::now()).unwrap();
        assert_eq!(normalized.source, CommunicationSource::Manual);
        assert_eq!(normalized.metadata, CommunicationMetadata::Manual);
    }
}
