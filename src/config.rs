//! Process configuration from the environment (and `.env` via dotenvy).

use std::net::SocketAddr;
use std::str::FromStr;

pub const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_ttl_secs: i64,
    /// Replay cap, always within `1..=MAX_HISTORY_LIMIT`.
    pub history_limit: i64,
    pub history_since_login: bool,
    /// In grapheme clusters.
    pub max_message_len: usize,
    pub ws_buffer: usize,
    pub ws_idle_timeout_secs: u64,
    pub seed_sample_data: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            store_backend: StoreBackend::Memory,
            database_url: None,
            jwt_secret: "dev-only-secret".to_string(),
            token_ttl_secs: 86_400,
            history_limit: 50,
            history_since_login: true,
            max_message_len: 2000,
            ws_buffer: 64,
            ws_idle_timeout_secs: 300,
            seed_sample_data: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let store_backend = parse_or(&lookup, "STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let jwt_secret = match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => {
                tracing::warn!("JWT_SECRET not set; generated a random secret, sessions will not survive a restart");
                format!(
                    "{}{}",
                    uuid::Uuid::new_v4().simple(),
                    uuid::Uuid::new_v4().simple()
                )
            }
        };

        let history_limit: i64 = parse_or(&lookup, "HISTORY_LIMIT", defaults.history_limit)?;

        Ok(Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            store_backend,
            database_url,
            jwt_secret,
            token_ttl_secs: parse_or(&lookup, "TOKEN_TTL_SECS", defaults.token_ttl_secs)?,
            history_limit: history_limit.clamp(1, MAX_HISTORY_LIMIT),
            history_since_login: parse_or(
                &lookup,
                "HISTORY_SINCE_LOGIN",
                defaults.history_since_login,
            )?,
            max_message_len: parse_or(&lookup, "MAX_MESSAGE_LEN", defaults.max_message_len)?,
            ws_buffer: parse_or(&lookup, "WS_BUFFER", defaults.ws_buffer)?,
            ws_idle_timeout_secs: parse_or(
                &lookup,
                "WS_IDLE_TIMEOUT_SECS",
                defaults.ws_idle_timeout_secs,
            )?,
            seed_sample_data: parse_or(&lookup, "SEED_SAMPLE_DATA", defaults.seed_sample_data)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
