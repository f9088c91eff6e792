use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::utils::auth::CurrentUser;
use crate::AppState;

#[derive(Serialize)]
pub struct ProfileResponse {
    username: String,
    role: String,
    join_date: DateTime<Utc>,
    online_status: bool,
    banned: bool,
}

#[derive(Serialize)]
pub struct OnlineUsersResponse {
    users: Vec<String>,
}

/// GET /profile — The signed-in user's account.
pub async fn get_profile(CurrentUser(user): CurrentUser) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        username: user.username,
        role: user.role,
        join_date: user.join_date,
        online_status: user.online_status,
        banned: user.banned,
    })
}

/// GET /users/online — Who is in the chat room right now.
pub async fn get_online_users(
    State(state): State<AppState>,
) -> Result<Json<OnlineUsersResponse>, (StatusCode, &'static str)> {
    let users = state.hub.presence().await.map_err(|e| {
        tracing::error!("presence: {:?}", e);
        (StatusCode::SERVICE_UNAVAILABLE, "Chat is unavailable")
    })?;
    Ok(Json(OnlineUsersResponse { users }))
}
