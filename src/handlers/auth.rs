use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;

use crate::models::{NewUser, MAX_USERNAME_LEN, ROLE_USER};
use crate::store::{self, StoreError};
use crate::utils::auth::{hash_password, issue_token, new_salt, verify_password};
use crate::AppState;

#[derive(serde::Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct SignupResponse {
    username: String,
    role: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    username: String,
    role: String,
}

/// POST /signup — Create a regular account.
pub async fn post_signup(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let username = body.username.trim().to_string();
    if username.is_empty() || body.password.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Username and password are required"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err((StatusCode::BAD_REQUEST, "Username is too long"));
    }

    let salt = new_salt();
    let new_user = NewUser {
        username,
        password_hash: hash_password(&body.password, &salt),
        password_salt: salt,
        role: ROLE_USER.to_string(),
        join_date: Utc::now(),
        banned: false,
        online_status: false,
    };

    let user = store::blocking(state.store.clone(), move |s| s.create_user(new_user))
        .await
        .map_err(|e| match e {
            StoreError::Conflict => (
                StatusCode::CONFLICT,
                "Username already exists, choose another username.",
            ),
            e => {
                tracing::error!("create user: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to sign up")
            }
        })?;
    tracing::info!(username = %user.username, "user signed up");

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            username: user.username,
            role: user.role,
        }),
    ))
}

/// POST /login — Check credentials and issue a session token.
pub async fn post_login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<LoginResponse>, (StatusCode, &'static str)> {
    let username = body.username.trim().to_string();
    let user = store::blocking(state.store.clone(), move |s| s.find_user(&username))
        .await
        .map_err(|e| {
            tracing::error!("find user: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?
        .ok_or((StatusCode::UNAUTHORIZED, "Invalid username or password"))?;

    if !verify_password(&body.password, &user.password_salt, &user.password_hash) {
        return Err((StatusCode::UNAUTHORIZED, "Invalid username or password"));
    }
    if user.banned {
        return Err((StatusCode::FORBIDDEN, "User is banned"));
    }

    let token = issue_token(
        &state.config.jwt_secret,
        &user.username,
        &user.role,
        Utc::now(),
        state.config.token_ttl_secs,
    )
    .map_err(|e| {
        tracing::error!("issue token: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session")
    })?;
    tracing::info!(username = %user.username, "user logged in");

    Ok(Json(LoginResponse {
        token,
        username: user.username,
        role: user.role,
    }))
}
