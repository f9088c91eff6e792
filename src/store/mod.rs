//! Persistence for users and chat messages. The live chat only ever reaches the store through
//! the hub's store worker and the history load on connect.

pub mod memory;
pub mod pg;
pub mod seed;

use chrono::{DateTime, Utc};

use crate::models::{ChatMessage, NewUser, User};

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("database query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("username already exists")]
    Conflict,
    #[error("store lock poisoned")]
    Poisoned,
    #[error("blocking store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub trait MessageStore: Send + Sync {
    fn persist_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Most recent messages (at or after `since` when given), returned oldest-first.
    fn fetch_recent_messages(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    fn count_messages(&self) -> Result<i64, StoreError>;
}

pub trait UserStore: Send + Sync {
    fn find_user(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the username is taken.
    fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Returns false when no such user exists.
    fn set_banned(&self, username: &str, banned: bool) -> Result<bool, StoreError>;

    /// Returns false when no such user exists.
    fn delete_user(&self, username: &str) -> Result<bool, StoreError>;

    fn set_online(&self, username: &str, online: bool) -> Result<(), StoreError>;

    /// Mark everyone offline. Presence lives in memory and does not survive a restart.
    fn reset_online(&self) -> Result<(), StoreError>;
}

pub trait Store: MessageStore + UserStore {}

impl<T: MessageStore + UserStore> Store for T {}

/// Run a store call on the blocking pool.
pub async fn blocking<T, F>(store: std::sync::Arc<dyn Store>, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(store.as_ref())).await?
}
