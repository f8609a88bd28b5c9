//! Post-session feedback: reflections, bonding feedback and communication scores

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use super::{required, ApiJson};
use crate::config::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::{CommunicationScore, PostResolution, Reflection};
use crate::store::StoreError;

/// POST /api/reflection
pub async fn submit_reflection(
    State(state): State<AppState>,
    ApiJson(mut reflection): ApiJson<Reflection>,
) -> ApiResult<(StatusCode, Json<Reflection>)> {
    reflection.user_id = required(&reflection.user_id, "Missing userId or sessionId")?;
    reflection.session_id = required(&reflection.session_id, "Missing userId or sessionId")?;
    info!(
        "POST /api/reflection - {} on {}",
        reflection.user_id, reflection.session_id
    );

    let session = state
        .store
        .find_session(&reflection.session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    if reflection.text.trim().is_empty() {
        reflection.text = state.ai.reflect(&session.messages).await?;
    }

    reflection.id = Reflection::record_id(&reflection.session_id, &reflection.user_id);
    reflection.timestamp = Utc::now().timestamp();

    match state.store.insert_reflection(&reflection).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(reflection))),
        Err(StoreError::Conflict(_)) => Err(ApiError::conflict(
            "Reflection already submitted for this session",
        )),
        Err(e) => Err(e.into()),
    }
}

/// POST /api/post-resolution
pub async fn submit_post_resolution(
    State(state): State<AppState>,
    ApiJson(mut feedback): ApiJson<PostResolution>,
) -> ApiResult<(StatusCode, Json<PostResolution>)> {
    const MISSING: &str = "Missing required fields: userId, sessionId, or gratitude";
    feedback.user_id = required(&feedback.user_id, MISSING)?;
    feedback.session_id = required(&feedback.session_id, MISSING)?;
    required(&feedback.gratitude, MISSING)?;
    if let Some(score) = feedback.attachment_score {
        if !(1..=5).contains(&score) {
            return Err(ApiError::bad_request("attachmentScore must be between 1 and 5"));
        }
    }
    info!(
        "POST /api/post-resolution - {} on {}",
        feedback.user_id, feedback.session_id
    );

    feedback.id = Reflection::record_id(&feedback.session_id, &feedback.user_id);
    feedback.timestamp = Utc::now().timestamp();

    match state.store.insert_post_resolution(&feedback).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(feedback))),
        Err(StoreError::Conflict(_)) => Err(ApiError::conflict(
            "Feedback already submitted for this session",
        )),
        Err(e) => Err(e.into()),
    }
}

/// POST /api/score
///
/// A score with empathy, listening and respect all zero is generated from
/// the transcript instead. Resubmitting replaces the partner's earlier score.
pub async fn submit_score(
    State(state): State<AppState>,
    ApiJson(mut score): ApiJson<CommunicationScore>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    score.session_id = required(&score.session_id, "Missing sessionId or partnerId")?;
    score.partner_id = required(&score.partner_id, "Missing sessionId or partnerId")?;
    info!("POST /api/score - {} on {}", score.partner_id, score.session_id);

    let session = state
        .store
        .find_session(&score.session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;
    if !session.includes(&score.partner_id) {
        return Err(ApiError::bad_request("partnerId is not part of this session"));
    }

    let now = Utc::now().timestamp();
    if score.is_blank() {
        let draft = state.ai.score(&session.messages).await?;
        score = draft.into_score(&score.session_id, &score.partner_id, now);
    } else {
        for value in [
            score.empathy,
            score.listening,
            score.respect,
            score.clarity,
            score.conflict_resolution,
        ] {
            if value > 5 {
                return Err(ApiError::bad_request("Scores must be between 0 and 5"));
            }
        }
        score.created_at = now;
    }

    state.store.save_score(&score).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Score saved successfully",
            "score": score,
        })),
    ))
}
