//! Registration, login, pairing and onboarding

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{required, ApiJson};
use crate::auth::{hash_password, new_id, verify_password};
use crate::config::AppState;
use crate::error::{ApiError, ApiResult};
use crate::mail::templates;
use crate::models::{Onboarding, User, DEFAULT_COLOR_CODE};
use crate::store::StoreError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub gender: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    pub other_goal: Option<String>,
    #[serde(default)]
    pub challenges: Vec<String>,
    pub other_challenge: Option<String>,
    pub color_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    #[serde(default)]
    pub your_id: String,
    pub partner_email: Option<String>,
    pub partner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInviteRequest {
    #[serde(default)]
    pub your_id: String,
    #[serde(default)]
    pub inviter_id: String,
}

/// POST /api/register
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let name = required(&req.name, "Name, email and password are required")?;
    let email = required(&req.email, "Name, email and password are required")?;
    if req.password.is_empty() {
        return Err(ApiError::bad_request("Name, email and password are required"));
    }
    info!("POST /api/register - {}", email);

    let password_hash = hash_password(&req.password, state.config.password_cost).await?;
    let user = User {
        id: new_id(),
        name,
        email,
        password_hash,
        gender: req.gender,
        goals: req.goals,
        other_goal: req.other_goal,
        challenges: req.challenges,
        other_challenge: req.other_challenge,
        color_code: req
            .color_code
            .filter(|c| !c.trim().is_empty())
            .or_else(|| Some(DEFAULT_COLOR_CODE.to_string())),
        partner_id: None,
        invited_by: None,
        created_at: Utc::now(),
    };

    match state.store.insert_user(&user).await {
        Ok(()) => {}
        Err(StoreError::Conflict(_)) => {
            warn!("Registration rejected, email in use: {}", user.email);
            return Err(ApiError::conflict("Email already registered"));
        }
        Err(e) => return Err(e.into()),
    }

    info!("User {} registered", user.id);
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<User>> {
    let email = required(&req.email, "Email and password are required")?;
    info!("POST /api/login - {}", email);

    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash).await {
        warn!("Failed login attempt for {}", email);
        return Err(invalid());
    }
    Ok(Json(user))
}

/// GET /api/user/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<User>> {
    state
        .store
        .find_user(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// POST /api/invite
pub async fn invite(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<InviteRequest>,
) -> ApiResult<Json<Value>> {
    let your_id = required(&req.your_id, "Missing yourId")?;
    info!("POST /api/invite - from {}", your_id);

    let inviter = state
        .store
        .find_user(&your_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let invitee = match (req.partner_email.as_deref(), req.partner_id.as_deref()) {
        (Some(email), _) if !email.trim().is_empty() => {
            state.store.find_user_by_email(email.trim()).await?
        }
        (_, Some(id)) if !id.trim().is_empty() => state.store.find_user(id.trim()).await?,
        _ => return Err(ApiError::bad_request("Missing partnerEmail or partnerId")),
    }
    .ok_or_else(|| ApiError::not_found("Partner not found"))?;

    if invitee.id == inviter.id {
        return Err(ApiError::bad_request("You cannot invite yourself"));
    }
    if inviter.is_paired() || invitee.is_paired() {
        return Err(ApiError::conflict("Already paired with a partner"));
    }
    if invitee.invited_by.is_some() {
        return Err(ApiError::conflict("An invite is already pending for this partner"));
    }

    state.store.set_invited_by(&invitee.id, &inviter.id).await?;

    let mailer = state.mailer.clone();
    let email = templates::invite_received(&invitee.email, &invitee.name, &inviter.name);
    state.tasks.spawn("invite-email", async move {
        mailer.send(&email).await.context("invite email")
    });

    info!("{} invited {}", inviter.id, invitee.id);
    Ok(Json(json!({
        "message": "Invite sent",
        "inviteeId": invitee.id,
    })))
}

/// POST /api/accept-invite
pub async fn accept_invite(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AcceptInviteRequest>,
) -> ApiResult<Json<Value>> {
    let your_id = required(&req.your_id, "Missing yourId or inviterId")?;
    let inviter_id = required(&req.inviter_id, "Missing yourId or inviterId")?;
    info!("POST /api/accept-invite - {} accepts {}", your_id, inviter_id);

    let me = state
        .store
        .find_user(&your_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if me.invited_by.as_deref() != Some(inviter_id.as_str()) {
        return Err(ApiError::not_found("No pending invite from this user"));
    }
    let inviter = state
        .store
        .find_user(&inviter_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Inviter not found"))?;
    if me.is_paired() || inviter.is_paired() {
        return Err(ApiError::conflict("Already paired with a partner"));
    }

    state.store.link_partners(&me.id, &inviter.id).await?;

    info!("Partners linked: {} <-> {}", me.id, inviter.id);
    Ok(Json(json!({
        "message": "Partners linked successfully",
        "partnerId": inviter.id,
    })))
}

/// POST /api/onboarding
pub async fn onboarding(
    State(state): State<AppState>,
    ApiJson(mut data): ApiJson<Onboarding>,
) -> ApiResult<(StatusCode, Json<Onboarding>)> {
    data.user_id = required(&data.user_id, "Missing userId")?;
    data.created_at = Utc::now();
    info!("POST /api/onboarding - {}", data.user_id);

    state.store.insert_onboarding(&data).await?;
    Ok((StatusCode::CREATED, Json(data)))
}
