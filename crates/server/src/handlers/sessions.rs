//! Session lifecycle

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{required, ApiJson};
use crate::config::AppState;
use crate::error::{ApiError, ApiResult};
use crate::mail::{templates, Email};
use crate::models::Session;
use crate::store::Resolution;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    #[serde(default)]
    pub partner_a: String,
    #[serde(default)]
    pub partner_b: String,
}

/// POST /api/session
pub async fn start_session(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StartSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let partner_a = required(&req.partner_a, "Missing partnerA or partnerB")?;
    let partner_b = required(&req.partner_b, "Missing partnerA or partnerB")?;
    if partner_a == partner_b {
        return Err(ApiError::bad_request("A session needs two different partners"));
    }
    info!("POST /api/session - {} with {}", partner_a, partner_b);

    // Check-then-insert; two concurrent starts for one pair can both pass.
    if let Some(existing) = state
        .store
        .find_active_session_for_pair(&partner_a, &partner_b)
        .await?
    {
        debug!("Pair already in session {}", existing.id);
        return Err(ApiError::conflict("An active session already exists for this pair"));
    }

    let session = Session::new(partner_a, partner_b);
    state.store.insert_session(&session).await?;

    notify_partner_b(&state, &session, templates::session_started, "session-started-email");

    info!("Session {} started", session.id);
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/session/active/{userId}
pub async fn active_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Session>> {
    state
        .store
        .find_active_session(&user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No active session"))
}

/// GET /api/session/{sessionId}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    state
        .store
        .find_session(&session_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Session not found"))
}

/// GET /api/session/{sessionId}/participants
pub async fn session_participants(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let participants = state.registry.participants(&session_id);
    Json(json!({
        "sessionId": session_id,
        "participants": participants,
    }))
}

/// PATCH /api/session/end/{sessionId}
///
/// Ending an already-resolved session succeeds without repeating the
/// notification or scoring.
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    info!("PATCH /api/session/end/{}", session_id);

    let mut session = state
        .store
        .find_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    match state.store.resolve_session(&session_id).await? {
        Resolution::Missing => return Err(ApiError::not_found("Session not found")),
        Resolution::AlreadyResolved => {
            debug!("Session {} was already resolved", session_id);
        }
        Resolution::Resolved => {
            notify_partner_b(&state, &session, templates::session_ended, "session-ended-email");
            schedule_scoring(&state, &session);
        }
    }
    session.resolved = true;

    Ok(Json(json!({
        "message": "Session ended successfully",
        "session": session,
    })))
}

/// Email partner B, naming partner A. Skipped when either user is unknown.
fn notify_partner_b(
    state: &AppState,
    session: &Session,
    template: fn(&str, &str, &str, &str) -> Email,
    task: &'static str,
) {
    let store = state.store.clone();
    let mailer = state.mailer.clone();
    let session_id = session.id.clone();
    let partner_a = session.partner_a.clone();
    let partner_b = session.partner_b.clone();

    state.tasks.spawn(task, async move {
        let a = store.find_user(&partner_a).await?;
        let b = store.find_user(&partner_b).await?;
        let (Some(a), Some(b)) = (a, b) else {
            debug!("Skipping {} for session {}: partner not registered", task, session_id);
            return Ok(());
        };
        let email = template(&b.email, &b.name, &a.name, &session_id);
        mailer.send(&email).await.context(task)
    });
}

/// Generate a score for each partner who has not submitted one.
fn schedule_scoring(state: &AppState, session: &Session) {
    if !state.ai.is_enabled() {
        return;
    }

    for partner in session.partners() {
        if session.score_for(partner).is_some() {
            continue;
        }
        let ai = state.ai.clone();
        let store = state.store.clone();
        let session_id = session.id.clone();
        let partner = partner.to_string();

        state.tasks.spawn("auto-score", async move {
            let messages = store.session_messages(&session_id).await?;
            let draft = ai
                .score(&messages)
                .await
                .with_context(|| format!("scoring {} in session {}", partner, session_id))?;
            let score = draft.into_score(&session_id, &partner, Utc::now().timestamp());
            if store.insert_score_if_absent(&score).await? {
                info!("Auto-scored {} in session {}", partner, session_id);
            }
            Ok(())
        });
    }
}
