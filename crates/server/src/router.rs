use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppState;
use crate::handlers::{feedback, health, insights, moderation, sessions, users};
use crate::relay::{ws_chat, ws_voice};

/// Every REST and realtime route, with CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // Users
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/user/{id}", get(users::get_user))
        .route("/invite", post(users::invite))
        .route("/accept-invite", post(users::accept_invite))
        .route("/onboarding", post(users::onboarding))
        // Sessions
        .route("/session", post(sessions::start_session))
        .route("/session/active/{user_id}", get(sessions::active_session))
        .route("/session/end/{session_id}", patch(sessions::end_session))
        .route("/session/{session_id}", get(sessions::get_session))
        .route(
            "/session/{session_id}/participants",
            get(sessions::session_participants),
        )
        // AI moderation
        .route("/moderate", post(moderation::moderate))
        .route("/moderate/voice", post(moderation::moderate_voice))
        // Feedback
        .route("/reflection", post(feedback::submit_reflection))
        .route("/post-resolution", post(feedback::submit_post_resolution))
        .route("/score", post(feedback::submit_score))
        .route("/insights/{user_id}", get(insights::get_insights));

    Router::new()
        .nest("/api", api)
        .route("/ws/{user_id}/{session_id}", get(ws_chat))
        .route("/ws-voice/{session_id}/{user_id}", get(ws_voice))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
