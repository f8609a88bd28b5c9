use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::config::AppState;
use crate::error::ApiResult;
use crate::models::Insights;

/// GET /api/insights/{userId}
pub async fn get_insights(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Insights>> {
    info!("GET /api/insights/{}", user_id);

    let sessions = state.store.sessions_for_user(&user_id).await?;
    let reflections = state.store.reflections_for_user(&user_id).await?;
    let post_feedback = state.store.post_resolutions_for_user(&user_id).await?;
    let scores = state.store.scores_for_user(&user_id).await?;

    Ok(Json(Insights {
        sessions,
        reflections,
        post_feedback,
        scores,
    }))
}
