//! REST handlers

pub mod feedback;
pub mod insights;
pub mod moderation;
pub mod sessions;
pub mod users;

use axum::extract::FromRequest;

use crate::error::ApiError;

/// `Json` extractor whose rejections use the API's `{"error": ...}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Trimmed copy of a required field, or a 400 naming what is missing.
pub(crate) fn required(value: &str, message: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ApiError::bad_request(message))
    } else {
        Ok(trimmed.to_string())
    }
}

pub async fn health() -> &'static str {
    "Mend backend is running"
}
