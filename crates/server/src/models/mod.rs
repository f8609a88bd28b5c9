use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker id used for every message the server authors itself.
pub const AI_SPEAKER: &str = "AI";

/// Default color assigned to a freshly registered partner.
pub const DEFAULT_COLOR_CODE: &str = "blue";

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_goal: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_code: Option<String>,
    /// Set on both users once an invite is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    /// Set on the invitee while an invite is pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_paired(&self) -> bool {
        self.partner_id.is_some()
    }
}

/// Onboarding questionnaire answers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Onboarding {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub relationship_goals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_goal: Option<String>,
    #[serde(default)]
    pub current_challenges: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_challenge: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// A single transcript line within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub speaker_id: String,
    pub text: String,
    /// Unix seconds
    pub timestamp: i64,
    /// Transcript order key, taken when the message is created. Writes may
    /// land in any order; reads sort on this.
    #[serde(skip)]
    pub position: i64,
}

static LAST_POSITION: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing across the process, seeded from the clock in
/// microseconds so keys from a later run sort after earlier ones.
fn next_position() -> i64 {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_POSITION
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(previous + 1)
}

impl Message {
    pub fn new(speaker_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            text: text.into(),
            timestamp: Utc::now().timestamp(),
            position: next_position(),
        }
    }

    pub fn is_ai(&self) -> bool {
        self.speaker_id == AI_SPEAKER
    }
}

/// A conversation between two paired users
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub partner_a: String,
    pub partner_b: String,
    pub messages: Vec<Message>,
    pub score_a: Option<CommunicationScore>,
    pub score_b: Option<CommunicationScore>,
    /// Unix seconds
    pub created_at: i64,
    pub resolved: bool,
}

impl Session {
    pub fn new(partner_a: impl Into<String>, partner_b: impl Into<String>) -> Self {
        Self {
            id: crate::auth::new_id(),
            partner_a: partner_a.into(),
            partner_b: partner_b.into(),
            messages: Vec::new(),
            score_a: None,
            score_b: None,
            created_at: Utc::now().timestamp(),
            resolved: false,
        }
    }

    pub fn includes(&self, user_id: &str) -> bool {
        self.partner_a == user_id || self.partner_b == user_id
    }

    pub fn partners(&self) -> [&str; 2] {
        [&self.partner_a, &self.partner_b]
    }

    pub fn score_for(&self, partner_id: &str) -> Option<&CommunicationScore> {
        if partner_id == self.partner_a {
            self.score_a.as_ref()
        } else if partner_id == self.partner_b {
            self.score_b.as_ref()
        } else {
            None
        }
    }
}

/// Per-partner communication rating for one session.
///
/// Ratings run 1-5; an all-zero empathy/listening/respect triple means
/// "not rated yet" and asks the server to generate one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationScore {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub partner_id: String,
    #[serde(default)]
    pub empathy: u8,
    #[serde(default)]
    pub listening: u8,
    #[serde(default)]
    pub respect: u8,
    #[serde(default)]
    pub clarity: u8,
    #[serde(default)]
    pub conflict_resolution: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

impl CommunicationScore {
    pub fn is_blank(&self) -> bool {
        self.empathy == 0 && self.listening == 0 && self.respect == 0
    }
}

/// Post-session reflection, one per user per session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    /// "Thank you for..."
    #[serde(default)]
    pub gratitude: String,
    /// "I liked that you..."
    #[serde(default)]
    pub appreciation: String,
    /// "Going forward, I will..."
    #[serde(default)]
    pub commitment: String,
    /// Free-form reflection; generated from the transcript when left empty.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl Reflection {
    pub fn record_id(session_id: &str, user_id: &str) -> String {
        format!("{}-{}", session_id, user_id)
    }
}

/// Emotional bonding feedback given after a session is resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResolution {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub gratitude: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_feelings: Option<String>,
    /// Optional 1-5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_score: Option<u8>,
    #[serde(default)]
    pub timestamp: i64,
}

/// Aggregated read of everything a user has produced across sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub sessions: Vec<Session>,
    pub reflections: Vec<Reflection>,
    pub post_feedback: Vec<PostResolution>,
    pub scores: Vec<CommunicationScore>,
}
