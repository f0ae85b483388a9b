//! API authentication via bearer tokens.
//!
//! Provides token generation, persistence, and middleware for validating
//! `Authorization: Bearer <token>` headers on protected endpoints. The
//! bundled gate maps one static token to one caller identity; deployments
//! with a real identity provider replace this middleware and keep the
//! `AuthedUser` extension contract.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use crate::error::ApiError;
use crate::state::AppState;

/// The resolved caller identity, inserted by the auth middleware.
#[derive(Clone, Debug)]
pub struct AuthedUser(pub String);

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

/// Load token from file, or generate and save a new one.
pub fn load_or_generate_token(token_path: &std::path::Path) -> String {
    if let Ok(contents) = std::fs::read_to_string(token_path) {
        let token = contents.trim().to_string();
        if !token.is_empty() {
            tracing::info!("API token loaded from {}", token_path.display());
            return token;
        }
    }

    let token = generate_token();

    if let Some(parent) = token_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(token_path, &token) {
        tracing::warn!(error = %e, "Failed to save API token to {}", token_path.display());
    } else {
        // Restrict token file to owner-only access.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(token_path, std::fs::Permissions::from_mode(0o600));
        }
        tracing::info!("API token saved to {}", token_path.display());
    }

    token
}

/// Middleware that validates Bearer token authentication.
///
/// On success the resolved identity is attached as an `AuthedUser`
/// request extension; handlers extract it to scope chat ownership.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok());

    match header {
        Some(value) => {
            if let Some(token) = value.strip_prefix("Bearer ") {
                if token == state.api_token {
                    req.extensions_mut()
                        .insert(AuthedUser(state.api_user.clone()));
                    return next.run(req).await;
                }
            }
            ApiError::Unauthorized("Invalid bearer token".to_string()).into_response()
        }
        None => {
            ApiError::Unauthorized("Missing Authorization header".to_string()).into_response()
        }
    }
}
