use axum::{Json, extract::State, http::StatusCode};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use airchat_server::irc::registry::{RegistryError, SessionId};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub username: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub username: String,
    pub picture: String,
}

/// `POST /api/session`: start a gateway session for a user the login
/// service has already authenticated. The caller's bearer token must be
/// the configured login secret.
pub async fn create_session(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    let Some(secret) = state.config.login_secret.as_deref() else {
        warn!("session requested but no login secret is configured");
        return Err((StatusCode::SERVICE_UNAVAILABLE, "Login is not configured".into()));
    };
    if !constant_time_eq(auth.token().as_bytes(), secret.as_bytes()) {
        warn!("session requested with a bad login secret");
        return Err((StatusCode::UNAUTHORIZED, "Not authenticated".into()));
    }

    let username = req.username.trim();
    if username.is_empty() || username.len() > 32 {
        return Err((StatusCode::BAD_REQUEST, "Username must be 1-32 characters".into()));
    }

    let id = state.registry.create_session(username).await.map_err(|e| {
        error!("session creation failed: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Could not create session".to_string())
    })?;

    let picture = state
        .profiles
        .get(username)
        .await
        .map(|p| p.picture)
        .unwrap_or_else(|| state.config.default_picture.clone());

    Ok(Json(SessionResponse {
        session_id: id.to_string(),
        username: username.to_string(),
        picture,
    }))
}

/// `POST /api/logout`: disconnect every network of the bearer's session.
pub async fn logout(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> StatusCode {
    let id = SessionId::from(auth.token());
    match state.registry.logout(&id).await {
        Ok(()) => {
            info!(session = %id.short(), "logged out");
            StatusCode::OK
        }
        Err(RegistryError::UnknownSession) => StatusCode::BAD_REQUEST,
        Err(e) => {
            error!(session = %id.short(), "logout failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
