//! Persistence layer
//!
//! Handlers talk to a [`Store`] trait object; [`SqliteStore`] is the
//! production implementation and also backs the test suite in memory.

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CommunicationScore, Message, Onboarding, PostResolution, Reflection, Session, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness rule was violated; carries the kind of record.
    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A stored row could not be decoded back into a model.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Map a unique-constraint violation to [`StoreError::Conflict`], pass anything else through.
    pub(crate) fn from_insert(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(what.to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

/// Outcome of [`Store::resolve_session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// This call moved the session from active to resolved.
    Resolved,
    AlreadyResolved,
    Missing,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Users

    /// Insert a new user; `Conflict` when the email is taken.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn find_user(&self, id: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Record a pending invite on the invitee.
    async fn set_invited_by(&self, invitee_id: &str, inviter_id: &str) -> StoreResult<()>;
    /// Pair two users in both directions and clear any pending invite.
    async fn link_partners(&self, a: &str, b: &str) -> StoreResult<()>;
    async fn insert_onboarding(&self, onboarding: &Onboarding) -> StoreResult<()>;

    // Sessions

    async fn insert_session(&self, session: &Session) -> StoreResult<()>;
    /// Load a session with its transcript and scores.
    async fn find_session(&self, id: &str) -> StoreResult<Option<Session>>;
    /// Most recent unresolved session that includes the user.
    async fn find_active_session(&self, user_id: &str) -> StoreResult<Option<Session>>;
    /// Most recent unresolved session between the two users, in either order.
    async fn find_active_session_for_pair(&self, a: &str, b: &str) -> StoreResult<Option<Session>>;
    /// Mark resolved. Only one caller ever sees [`Resolution::Resolved`].
    async fn resolve_session(&self, id: &str) -> StoreResult<Resolution>;
    /// Every session the user took part in, newest first.
    async fn sessions_for_user(&self, user_id: &str) -> StoreResult<Vec<Session>>;
    /// Append to the transcript; `NotFound` when the session does not exist.
    async fn append_message(&self, session_id: &str, message: &Message) -> StoreResult<()>;
    async fn session_messages(&self, session_id: &str) -> StoreResult<Vec<Message>>;

    // Feedback

    /// `Conflict` when the user already reflected on the session.
    async fn insert_reflection(&self, reflection: &Reflection) -> StoreResult<()>;
    async fn reflections_for_user(&self, user_id: &str) -> StoreResult<Vec<Reflection>>;
    /// `Conflict` when the user already gave post-resolution feedback for the session.
    async fn insert_post_resolution(&self, feedback: &PostResolution) -> StoreResult<()>;
    async fn post_resolutions_for_user(&self, user_id: &str) -> StoreResult<Vec<PostResolution>>;

    /// Store a partner's score, replacing any earlier one for the same session.
    async fn save_score(&self, score: &CommunicationScore) -> StoreResult<()>;
    /// Store a score only if the partner has none yet. Returns true when written.
    async fn insert_score_if_absent(&self, score: &CommunicationScore) -> StoreResult<bool>;
    async fn scores_for_user(&self, user_id: &str) -> StoreResult<Vec<CommunicationScore>>;
}
