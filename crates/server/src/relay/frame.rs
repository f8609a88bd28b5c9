//! Realtime wire frames
//!
//! Clients send loosely-shaped JSON objects; every field is optional and
//! older clients use `content`/`speaker` instead of `text`/`speakerId`.
//! Server-authored frames always carry the full shape plus a timestamp.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::AI_SPEAKER;

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, alias = "speaker")]
    pub speaker_id: Option<String>,
    #[serde(default, alias = "content")]
    pub text: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl InboundFrame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref().map(str::trim)
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerFrameKind {
    Ai,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: ServerFrameKind,
    pub speaker_id: String,
    pub text: String,
    pub session_id: String,
    pub timestamp: i64,
}

impl ServerFrame {
    fn new(kind: ServerFrameKind, session_id: &str, text: impl Into<String>) -> Self {
        Self {
            kind,
            speaker_id: AI_SPEAKER.to_string(),
            text: text.into(),
            session_id: session_id.to_string(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn ai(session_id: &str, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::new(ServerFrameKind::Ai, session_id, text)
        }
    }

    pub fn warning(session_id: &str, text: impl Into<String>) -> Self {
        Self::new(ServerFrameKind::Warning, session_id, text)
    }

    pub fn error(session_id: &str, text: impl Into<String>) -> Self {
        Self::new(ServerFrameKind::Error, session_id, text)
    }

    pub fn to_payload(&self) -> Arc<str> {
        Arc::from(serde_json::to_string(self).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_field_names_are_accepted() {
        let frame = InboundFrame::parse(r#"{"type":"text","speaker":"u1","content":"hi"}"#).unwrap();
        assert_eq!(frame.kind(), Some("text"));
        assert_eq!(frame.speaker_id.as_deref(), Some("u1"));
        assert_eq!(frame.text(), "hi");
    }

    #[test]
    fn missing_fields_default() {
        let frame = InboundFrame::parse("{}").unwrap();
        assert_eq!(frame.kind(), None);
        assert_eq!(frame.text(), "");
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse("\"just a string\"").is_err());
    }

    #[test]
    fn server_frame_shape() {
        let payload = ServerFrame::warning("s1", "slow down").to_payload();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "warning");
        assert_eq!(value["speakerId"], "AI");
        assert_eq!(value["sessionId"], "s1");
        assert!(value["timestamp"].is_i64());
    }
}
