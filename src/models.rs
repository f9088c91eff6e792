use crate::schema;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

/// Longest username accepted at signup; matches the `users.username` column.
pub const MAX_USERNAME_LEN: usize = 32;

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = schema::users)]
pub struct User {
    pub id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub password_salt: String,
    pub role: String,
    pub join_date: DateTime<Utc>,
    pub banned: bool,
    pub online_status: bool,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// For inserting a user. `join_date` is set by the caller (e.g. `Utc::now()`).
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::users)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
    pub role: String,
    pub join_date: DateTime<Utc>,
    pub banned: bool,
    pub online_status: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::messages)]
pub struct MessageRow {
    pub id: i64,
    pub content: String,
    pub sender: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::messages)]
pub struct NewMessageRow<'a> {
    pub content: &'a str,
    pub sender: &'a str,
    pub sent_at: DateTime<Utc>,
}

/// A chat message as it travels over the wire and into the store.
/// The timestamp is always assigned by the server at receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            timestamp: Utc::now(),
        }
    }
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        ChatMessage {
            content: row.content,
            sender: row.sender,
            timestamp: row.sent_at,
        }
    }
}

impl<'a> From<&'a ChatMessage> for NewMessageRow<'a> {
    fn from(m: &'a ChatMessage) -> Self {
        NewMessageRow {
            content: &m.content,
            sender: &m.sender,
            sent_at: m.timestamp,
        }
    }
}
