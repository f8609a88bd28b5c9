//! Credential utilities
//!
//! Password hashing runs on the blocking pool since bcrypt is CPU-bound.

use anyhow::{Context, Result};
use bcrypt::{hash, verify};
use uuid::Uuid;

/// Opaque id for users and sessions.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Hash a password with the given bcrypt cost.
pub async fn hash_password(password: &str, cost: u32) -> Result<String> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .context("Password hashing task failed")?
        .context("Failed to hash password")
}

/// Check a password against a stored hash. Malformed hashes never verify.
pub async fn verify_password(password: &str, password_hash: &str) -> bool {
    let password = password.to_owned();
    let password_hash = password_hash.to_owned();
    tokio::task::spawn_blocking(move || verify(password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}
