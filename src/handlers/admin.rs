//! Admin endpoints. Banning or removing a user also drops their live chat connections.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store;
use crate::utils::auth::AdminUser;
use crate::AppState;

#[derive(serde::Deserialize)]
pub struct UsernamePath {
    username: String,
}

#[derive(Serialize)]
pub struct UserSummary {
    id: i32,
    username: String,
    role: String,
    join_date: DateTime<Utc>,
    banned: bool,
    online_status: bool,
}

/// GET /admin/users — Every account, for the dashboard.
pub async fn get_users(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserSummary>>, (StatusCode, &'static str)> {
    let users = store::blocking(state.store.clone(), |s| s.list_users())
        .await
        .map_err(|e| {
            tracing::error!("list users: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list users")
        })?;
    Ok(Json(
        users
            .into_iter()
            .map(|u| UserSummary {
                id: u.id,
                username: u.username,
                role: u.role,
                join_date: u.join_date,
                banned: u.banned,
                online_status: u.online_status,
            })
            .collect(),
    ))
}

/// POST /admin/users/:username/ban — Ban a user and disconnect them.
pub async fn post_ban(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(UsernamePath { username }): Path<UsernamePath>,
) -> Result<StatusCode, (StatusCode, &'static str)> {
    if username == admin.username {
        return Err((StatusCode::BAD_REQUEST, "You cannot ban yourself"));
    }
    set_banned(&state, &username, true).await?;
    kick(&state, &username).await;
    tracing::info!(admin = %admin.username, username = %username, "user banned");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/users/:username/unban — Lift a ban.
pub async fn post_unban(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(UsernamePath { username }): Path<UsernamePath>,
) -> Result<StatusCode, (StatusCode, &'static str)> {
    set_banned(&state, &username, false).await?;
    tracing::info!(admin = %admin.username, username = %username, "user unbanned");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/users/:username — Remove an account and disconnect it.
pub async fn delete_user(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(UsernamePath { username }): Path<UsernamePath>,
) -> Result<StatusCode, (StatusCode, &'static str)> {
    if username == admin.username {
        return Err((StatusCode::BAD_REQUEST, "You cannot remove yourself"));
    }
    let name = username.clone();
    let deleted = store::blocking(state.store.clone(), move |s| s.delete_user(&name))
        .await
        .map_err(|e| {
            tracing::error!("delete user: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to remove user")
        })?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "User not found"));
    }
    kick(&state, &username).await;
    tracing::info!(admin = %admin.username, username = %username, "user removed");
    Ok(StatusCode::NO_CONTENT)
}

async fn set_banned(
    state: &AppState,
    username: &str,
    banned: bool,
) -> Result<(), (StatusCode, &'static str)> {
    let name = username.to_string();
    let found = store::blocking(state.store.clone(), move |s| s.set_banned(&name, banned))
        .await
        .map_err(|e| {
            tracing::error!("set banned: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to update user")
        })?;
    if !found {
        return Err((StatusCode::NOT_FOUND, "User not found"));
    }
    Ok(())
}

async fn kick(state: &AppState, username: &str) {
    match state.hub.disconnect_user(username).await {
        Ok(0) => {}
        Ok(closed) => tracing::info!(username, closed, "closed live connections"),
        Err(e) => tracing::warn!("disconnect {}: {}", username, e),
    }
}
