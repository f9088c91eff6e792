//! Sample accounts and welcome messages for a fresh install (`SEED_SAMPLE_DATA=true`).

use chrono::{Duration, Utc};

use super::{Store, StoreError};
use crate::models::{ChatMessage, NewUser, ROLE_ADMIN, ROLE_USER};
use crate::utils::auth::{hash_password, new_salt};

const SAMPLE_USERS: [(&str, &str, &str); 2] = [
    ("AdminUser", "admin123", ROLE_ADMIN),
    ("RegularUser", "user123", ROLE_USER),
];

const SAMPLE_MESSAGES: [(&str, &str); 3] = [
    ("Welcome to the chat, everyone!", "AdminUser"),
    ("Hi! Thanks for setting this up.", "RegularUser"),
    ("Let me know if you need help.", "AdminUser"),
];

pub fn seed_sample_data(store: &dyn Store) -> Result<(), StoreError> {
    for (username, password, role) in SAMPLE_USERS {
        if store.find_user(username)?.is_some() {
            continue;
        }
        let salt = new_salt();
        store.create_user(NewUser {
            username: username.to_string(),
            password_hash: hash_password(password, &salt),
            password_salt: salt,
            role: role.to_string(),
            join_date: Utc::now(),
            banned: false,
            online_status: false,
        })?;
        tracing::info!(username, role, "sample user created");
    }

    if store.count_messages()? > 0 {
        tracing::info!("messages already exist; skipping sample messages");
        return Ok(());
    }
    // Spaced a second apart so replay order is deterministic.
    let base = Utc::now() - Duration::seconds(SAMPLE_MESSAGES.len() as i64);
    for (i, (content, sender)) in SAMPLE_MESSAGES.iter().enumerate() {
        store.persist_message(&ChatMessage {
            content: content.to_string(),
            sender: sender.to_string(),
            timestamp: base + Duration::seconds(i as i64),
        })?;
    }
    tracing::info!(count = SAMPLE_MESSAGES.len(), "sample messages inserted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MessageStore, UserStore};

    #[test]
    fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        seed_sample_data(&store).unwrap();
        seed_sample_data(&store).unwrap();
        assert_eq!(store.list_users().unwrap().len(), 2);
        assert_eq!(store.count_messages().unwrap(), 3);
        let admin = store.find_user("AdminUser").unwrap().unwrap();
        assert!(admin.is_admin());
        let history = store.fetch_recent_messages(None, 50).unwrap();
        assert_eq!(history[0].content, "Welcome to the chat, everyone!");
    }
}
