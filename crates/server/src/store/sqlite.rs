//! SQLite-backed [`Store`]
//!
//! Each model gets its own table. List fields are stored as JSON text and
//! user/onboarding timestamps as RFC 3339 strings; transcript and score
//! timestamps stay as unix seconds.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{Resolution, Store, StoreError, StoreResult};
use crate::models::{
    CommunicationScore, Message, Onboarding, PostResolution, Reflection, Session, User,
};

type UserRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

type SessionRow = (String, String, String, i64, bool);

type ScoreRow = (String, String, i64, i64, i64, i64, i64, Option<String>, i64);

type ReflectionRow = (String, String, String, String, String, String, String, i64);

type PostResolutionRow = (String, String, String, String, Option<String>, Option<i64>, i64);

const USER_COLUMNS: &str = "id, name, email, password_hash, gender, goals, other_goal, \
     challenges, other_challenge, color_code, partner_id, invited_by, created_at";

const SCORE_COLUMNS: &str = "session_id, partner_id, empathy, listening, respect, clarity, \
     conflict_resolution, summary, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and ensure the schema exists.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every pooled connection to an in-memory database is a separate
        // database, so keep exactly one alive for the pool's lifetime.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;

        info!("[Store] SQLite ready at {}", url);
        Ok(store)
    }

    /// Fresh private in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                gender TEXT,
                goals TEXT NOT NULL DEFAULT '[]',
                other_goal TEXT,
                challenges TEXT NOT NULL DEFAULT '[]',
                other_challenge TEXT,
                color_code TEXT,
                partner_id TEXT,
                invited_by TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS onboarding (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                gender TEXT NOT NULL,
                relationship_goals TEXT NOT NULL,
                other_goal TEXT,
                current_challenges TEXT NOT NULL,
                other_challenge TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                partner_a TEXT NOT NULL,
                partner_b TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_sessions_partners ON sessions (partner_a, partner_b)",
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                speaker_id TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                position INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, position)",
            r#"
            CREATE TABLE IF NOT EXISTS scores (
                session_id TEXT NOT NULL,
                partner_id TEXT NOT NULL,
                empathy INTEGER NOT NULL,
                listening INTEGER NOT NULL,
                respect INTEGER NOT NULL,
                clarity INTEGER NOT NULL,
                conflict_resolution INTEGER NOT NULL,
                summary TEXT,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (session_id, partner_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reflections (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                gratitude TEXT NOT NULL,
                appreciation TEXT NOT NULL,
                commitment TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                UNIQUE (session_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS post_resolutions (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                gratitude TEXT NOT NULL,
                shared_feelings TEXT,
                attachment_score INTEGER,
                timestamp INTEGER NOT NULL,
                UNIQUE (session_id, user_id)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fetch_user(&self, column: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    /// Attach transcript and scores to a bare session row.
    async fn hydrate(&self, row: SessionRow) -> StoreResult<Session> {
        let (id, partner_a, partner_b, created_at, resolved) = row;
        let messages = self.session_messages(&id).await?;

        let scores: Vec<ScoreRow> = sqlx::query_as(&format!(
            "SELECT {} FROM scores WHERE session_id = ?",
            SCORE_COLUMNS
        ))
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;
        let mut score_a = None;
        let mut score_b = None;
        for score in scores.into_iter().map(score_from_row) {
            if score.partner_id == partner_a {
                score_a = Some(score);
            } else if score.partner_id == partner_b {
                score_b = Some(score);
            }
        }

        Ok(Session {
            id,
            partner_a,
            partner_b,
            messages,
            score_a,
            score_b,
            created_at,
            resolved,
        })
    }

    async fn hydrate_all(&self, rows: Vec<SessionRow>) -> StoreResult<Vec<Session>> {
        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(self.hydrate(row).await?);
        }
        Ok(sessions)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO users ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            USER_COLUMNS
        ))
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.gender)
        .bind(encode_list(&user.goals)?)
        .bind(&user.other_goal)
        .bind(encode_list(&user.challenges)?)
        .bind(&user.other_challenge)
        .bind(&user.color_code)
        .bind(&user.partner_id)
        .bind(&user.invited_by)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, "user"))?;
        Ok(())
    }

    async fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        self.fetch_user("id", id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.fetch_user("email", email).await
    }

    async fn set_invited_by(&self, invitee_id: &str, inviter_id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET invited_by = ? WHERE id = ?")
            .bind(inviter_id)
            .bind(invitee_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user".into()));
        }
        Ok(())
    }

    async fn link_partners(&self, a: &str, b: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for (user, partner) in [(a, b), (b, a)] {
            let result =
                sqlx::query("UPDATE users SET partner_id = ?, invited_by = NULL WHERE id = ?")
                    .bind(partner)
                    .bind(user)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound("user".into()));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_onboarding(&self, onboarding: &Onboarding) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO onboarding (user_id, name, gender, relationship_goals, other_goal, current_challenges, other_challenge, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&onboarding.user_id)
        .bind(&onboarding.name)
        .bind(&onboarding.gender)
        .bind(encode_list(&onboarding.relationship_goals)?)
        .bind(&onboarding.other_goal)
        .bind(encode_list(&onboarding.current_challenges)?)
        .bind(&onboarding.other_challenge)
        .bind(onboarding.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, partner_a, partner_b, created_at, resolved) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.partner_a)
        .bind(&session.partner_b)
        .bind(session.created_at)
        .bind(session.resolved)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, "session"))?;

        for message in &session.messages {
            self.append_message(&session.id, message).await?;
        }
        Ok(())
    }

    async fn find_session(&self, id: &str) -> StoreResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, partner_a, partner_b, created_at, resolved FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_active_session(&self, user_id: &str) -> StoreResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, partner_a, partner_b, created_at, resolved FROM sessions \
             WHERE resolved = 0 AND (partner_a = ?1 OR partner_b = ?1) \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_active_session_for_pair(&self, a: &str, b: &str) -> StoreResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, partner_a, partner_b, created_at, resolved FROM sessions \
             WHERE resolved = 0 AND ((partner_a = ?1 AND partner_b = ?2) OR (partner_a = ?2 AND partner_b = ?1)) \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn resolve_session(&self, id: &str) -> StoreResult<Resolution> {
        let result = sqlx::query("UPDATE sessions SET resolved = 1 WHERE id = ? AND resolved = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            return Ok(Resolution::Resolved);
        }

        let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match exists {
            Some(_) => Resolution::AlreadyResolved,
            None => Resolution::Missing,
        })
    }

    async fn sessions_for_user(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT id, partner_a, partner_b, created_at, resolved FROM sessions \
             WHERE partner_a = ?1 OR partner_b = ?1 \
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_all(rows).await
    }

    async fn append_message(&self, session_id: &str, message: &Message) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO messages (session_id, speaker_id, text, timestamp, position) \
             SELECT ?1, ?2, ?3, ?4, ?5 WHERE EXISTS (SELECT 1 FROM sessions WHERE id = ?1)",
        )
        .bind(session_id)
        .bind(&message.speaker_id)
        .bind(&message.text)
        .bind(message.timestamp)
        .bind(message.position)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("session".into()));
        }
        Ok(())
    }

    async fn session_messages(&self, session_id: &str) -> StoreResult<Vec<Message>> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT speaker_id, text, timestamp, position FROM messages \
             WHERE session_id = ? ORDER BY position, seq",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(speaker_id, text, timestamp, position)| Message {
                speaker_id,
                text,
                timestamp,
                position,
            })
            .collect())
    }

    async fn insert_reflection(&self, reflection: &Reflection) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO reflections (id, session_id, user_id, gratitude, appreciation, commitment, text, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&reflection.id)
        .bind(&reflection.session_id)
        .bind(&reflection.user_id)
        .bind(&reflection.gratitude)
        .bind(&reflection.appreciation)
        .bind(&reflection.commitment)
        .bind(&reflection.text)
        .bind(reflection.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, "reflection"))?;
        Ok(())
    }

    async fn reflections_for_user(&self, user_id: &str) -> StoreResult<Vec<Reflection>> {
        let rows: Vec<ReflectionRow> = sqlx::query_as(
            "SELECT id, session_id, user_id, gratitude, appreciation, commitment, text, timestamp \
             FROM reflections WHERE user_id = ? ORDER BY timestamp",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(id, session_id, user_id, gratitude, appreciation, commitment, text, timestamp)| {
                    Reflection {
                        id,
                        session_id,
                        user_id,
                        gratitude,
                        appreciation,
                        commitment,
                        text,
                        timestamp,
                    }
                },
            )
            .collect())
    }

    async fn insert_post_resolution(&self, feedback: &PostResolution) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO post_resolutions (id, session_id, user_id, gratitude, shared_feelings, attachment_score, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&feedback.id)
        .bind(&feedback.session_id)
        .bind(&feedback.user_id)
        .bind(&feedback.gratitude)
        .bind(&feedback.shared_feelings)
        .bind(feedback.attachment_score.map(i64::from))
        .bind(feedback.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, "post-resolution feedback"))?;
        Ok(())
    }

    async fn post_resolutions_for_user(&self, user_id: &str) -> StoreResult<Vec<PostResolution>> {
        let rows: Vec<PostResolutionRow> = sqlx::query_as(
            "SELECT id, session_id, user_id, gratitude, shared_feelings, attachment_score, timestamp \
             FROM post_resolutions WHERE user_id = ? ORDER BY timestamp",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(id, session_id, user_id, gratitude, shared_feelings, attachment, timestamp)| {
                    PostResolution {
                        id,
                        session_id,
                        user_id,
                        gratitude,
                        shared_feelings,
                        attachment_score: attachment.map(rating),
                        timestamp,
                    }
                },
            )
            .collect())
    }

    async fn save_score(&self, score: &CommunicationScore) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO scores ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (session_id, partner_id) DO UPDATE SET \
             empathy = excluded.empathy, listening = excluded.listening, \
             respect = excluded.respect, clarity = excluded.clarity, \
             conflict_resolution = excluded.conflict_resolution, \
             summary = excluded.summary, created_at = excluded.created_at",
            SCORE_COLUMNS
        ))
        .bind(&score.session_id)
        .bind(&score.partner_id)
        .bind(i64::from(score.empathy))
        .bind(i64::from(score.listening))
        .bind(i64::from(score.respect))
        .bind(i64::from(score.clarity))
        .bind(i64::from(score.conflict_resolution))
        .bind(&score.summary)
        .bind(score.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_score_if_absent(&self, score: &CommunicationScore) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            "INSERT OR IGNORE INTO scores ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SCORE_COLUMNS
        ))
        .bind(&score.session_id)
        .bind(&score.partner_id)
        .bind(i64::from(score.empathy))
        .bind(i64::from(score.listening))
        .bind(i64::from(score.respect))
        .bind(i64::from(score.clarity))
        .bind(i64::from(score.conflict_resolution))
        .bind(&score.summary)
        .bind(score.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn scores_for_user(&self, user_id: &str) -> StoreResult<Vec<CommunicationScore>> {
        let rows: Vec<ScoreRow> = sqlx::query_as(&format!(
            "SELECT {} FROM scores WHERE partner_id = ? ORDER BY created_at",
            SCORE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(score_from_row).collect())
    }
}

fn encode_list(items: &[String]) -> StoreResult<String> {
    serde_json::to_string(items).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_list(raw: &str) -> StoreResult<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("list column: {}", e)))
}

fn decode_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", raw, e)))
}

fn rating(value: i64) -> u8 {
    value.clamp(0, u8::MAX as i64) as u8
}

fn user_from_row(row: UserRow) -> StoreResult<User> {
    let (
        id,
        name,
        email,
        password_hash,
        gender,
        goals,
        other_goal,
        challenges,
        other_challenge,
        color_code,
        partner_id,
        invited_by,
        created_at,
    ) = row;
    Ok(User {
        id,
        name,
        email,
        password_hash,
        gender,
        goals: decode_list(&goals)?,
        other_goal,
        challenges: decode_list(&challenges)?,
        other_challenge,
        color_code,
        partner_id,
        invited_by,
        created_at: decode_time(&created_at)?,
    })
}

fn score_from_row(row: ScoreRow) -> CommunicationScore {
    let (
        session_id,
        partner_id,
        empathy,
        listening,
        respect,
        clarity,
        conflict_resolution,
        summary,
        created_at,
    ) = row;
    CommunicationScore {
        session_id,
        partner_id,
        empathy: rating(empathy),
        listening: rating(listening),
        respect: rating(respect),
        clarity: rating(clarity),
        conflict_resolution: rating(conflict_resolution),
        summary,
        created_at,
    }
}
