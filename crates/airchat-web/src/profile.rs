use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::{Deserialize, Serialize};
use tracing::warn;

use airchat_server::irc::profile::Profile;
use airchat_server::irc::registry::SessionId;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub bio: String,
    /// Keeps the current picture when absent or empty.
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Serialize)]
pub struct UpdateResponse {
    pub success: bool,
}

/// `POST /api/profile`: replace the bearer's profile.
pub async fn update_profile(
    State(state): State<AppState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<ProfileUpdate>,
) -> Result<Json<UpdateResponse>, StatusCode> {
    let id = SessionId::from(auth.token());
    let nick = state
        .registry
        .username(&id)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let picture = match req.picture.filter(|p| !p.trim().is_empty()) {
        Some(p) if is_picture_url(&p) => p,
        Some(_) => {
            warn!(session = %id.short(), "rejected profile picture");
            return Err(StatusCode::BAD_REQUEST);
        }
        None => state
            .profiles
            .get(&nick)
            .await
            .map(|p| p.picture)
            .unwrap_or_else(|| state.config.default_picture.clone()),
    };

    let profile = Profile {
        nick,
        bio: req.bio,
        contact: req.contact,
        picture,
    };
    let success = match state.profiles.put(profile).await {
        Ok(()) => true,
        Err(e) => {
            warn!(session = %id.short(), "profile update failed: {e}");
            false
        }
    };
    Ok(Json(UpdateResponse { success }))
}

/// Pictures end up in `<img src>`: only site paths and http(s) URLs, with
/// nothing that could leave the attribute.
fn is_picture_url(picture: &str) -> bool {
    let shaped = (picture.starts_with('/') && !picture.starts_with("//"))
        || picture.starts_with("https://")
        || picture.starts_with("http://");
    shaped
        && picture.len() <= 512
        && !picture
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '<' | '>' | '\\' | '`'))
}

/// `GET /api/profile/{nick}`
pub async fn get_profile(
    State(state): State<AppState>,
    Path(nick): Path<String>,
) -> Result<Json<Profile>, StatusCode> {
    state
        .profiles
        .get(&nick)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
