//! When and how the AI joins a live conversation

use anyhow::Context;
use tracing::{info, warn};

use super::frame::ServerFrame;
use crate::config::AppState;
use crate::models::{Message, AI_SPEAKER};

pub struct ModerationPolicy {
    trigger_words: Vec<String>,
    trigger_kinds: Vec<String>,
    interrupt_marker: String,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            trigger_words: ["stupid", "hate", "idiot"].map(String::from).to_vec(),
            trigger_kinds: ["transcript", "text"].map(String::from).to_vec(),
            interrupt_marker: "interrupt".to_string(),
        }
    }
}

impl ModerationPolicy {
    /// Moderate spoken transcripts, typed text and anything containing a trigger word.
    pub fn should_moderate(&self, kind: Option<&str>, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        if let Some(kind) = kind {
            if self.trigger_kinds.iter().any(|k| k.eq_ignore_ascii_case(kind)) {
                return true;
            }
        }
        let lower = text.to_lowercase();
        self.trigger_words.iter().any(|w| lower.contains(w.as_str()))
    }

    pub fn is_interruption(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.interrupt_marker)
    }
}

/// Ask for a therapist reply, record it in the transcript and send it to the
/// whole session. A failed write is logged; the reply is still delivered.
pub async fn moderate(state: AppState, session_id: String, text: String) -> anyhow::Result<()> {
    let reply = state
        .ai
        .therapist_reply(&text)
        .await
        .with_context(|| format!("moderation reply for session {}", session_id))?;

    let message = Message::new(AI_SPEAKER, reply);
    if let Err(e) = state.store.append_message(&session_id, &message).await {
        warn!("[Relay] Failed to persist AI reply in session {}: {}", session_id, e);
    }

    let frame = ServerFrame::ai(&session_id, message.text, message.timestamp);
    let report = state
        .registry
        .broadcast(&session_id, AI_SPEAKER, frame.to_payload());
    info!(
        "[Relay] AI reply sent to {} participant(s) in session {}",
        report.delivered, session_id
    );
    Ok(())
}
