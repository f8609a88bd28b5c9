use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{required, ApiJson};
use crate::ai::{prompts, VoiceEvaluation};
use crate::config::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct ModerateRequest {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub context: String,
}

/// POST /api/moderate
pub async fn moderate(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ModerateRequest>,
) -> ApiResult<Json<Value>> {
    let transcript = required(&req.transcript, "Transcript is required")?;
    info!("POST /api/moderate - speaker {:?}", req.speaker);

    let reply = state.ai.therapist_reply(&transcript).await?;
    let speaker = match req.speaker.trim() {
        "" => "your partner",
        name => name,
    };

    Ok(Json(json!({
        "aiReply": reply,
        "interrupt": prompts::interrupt_warning(speaker),
    })))
}

/// POST /api/moderate/voice
pub async fn moderate_voice(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ModerateRequest>,
) -> ApiResult<Json<VoiceEvaluation>> {
    let transcript = required(&req.transcript, "Transcript is required")?;
    info!("POST /api/moderate/voice - speaker {:?}", req.speaker);

    let evaluation = state
        .ai
        .evaluate_voice(req.speaker.trim(), &transcript, req.context.trim())
        .await?;
    Ok(Json(evaluation))
}
