//! Session tokens and password hashing. A token carries the username, role and login instant;
//! the live socket trusts it as the connection's identity.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, StatusCode};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::User;
use crate::store;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    pub role: String,
    /// Login instant, unix seconds.
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn login_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }
}

pub fn issue_token(
    secret: &str,
    username: &str,
    role: &str,
    issued_at: DateTime<Utc>,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let iat = issued_at.timestamp();
    let claims = Claims {
        sub: username.to_string(),
        role: role.to_string(),
        iat,
        exp: iat + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Salted SHA-256, hex encoded.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    hash_password(password, salt)
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}

/// The signed-in account, re-read from the store on every request so a ban or removal takes
/// effect before the token expires.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "Missing bearer token"))?;
        let claims = decode_token(&state.config.jwt_secret, token.trim()).map_err(|e| {
            tracing::debug!("reject session token: {:?}", e);
            (StatusCode::UNAUTHORIZED, "Invalid session token")
        })?;
        Ok(CurrentUser(session_user(state, claims.sub).await?))
    }
}

/// Like [`CurrentUser`] but only admits accounts whose stored role is admin.
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err((StatusCode::FORBIDDEN, "Admin role required"));
        }
        Ok(AdminUser(user))
    }
}

/// Load the account behind a session. Missing accounts are 401, banned ones 403.
pub async fn session_user(
    state: &AppState,
    username: String,
) -> Result<User, (StatusCode, &'static str)> {
    let user = store::blocking(state.store.clone(), move |s| s.find_user(&username))
        .await
        .map_err(|e| {
            tracing::error!("find session user: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?
        .ok_or((StatusCode::UNAUTHORIZED, "Unknown user"))?;
    if user.banned {
        tracing::warn!(username = %user.username, "banned user rejected");
        return Err((StatusCode::FORBIDDEN, "User is banned"));
    }
    Ok(user)
}
