//! In-process store for development (`STORE_BACKEND=memory`) and tests. Nothing is persisted.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

use super::{MessageStore, StoreError, UserStore};
use crate::models::{ChatMessage, NewUser, User};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    messages: Vec<ChatMessage>,
    next_user_id: i32,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl MessageStore for MemoryStore {
    fn persist_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.lock()?.messages.push(message.clone());
        Ok(())
    }

    fn fetch_recent_messages(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let inner = self.lock()?;
        let mut matching: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| since.map_or(true, |s| m.timestamp >= s))
            .cloned()
            .collect();
        // Stable, so equal timestamps keep insertion order.
        matching.sort_by_key(|m| m.timestamp);
        let keep = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let skip = matching.len().saturating_sub(keep);
        Ok(matching.split_off(skip))
    }

    fn count_messages(&self) -> Result<i64, StoreError> {
        Ok(self.lock()?.messages.len() as i64)
    }
}

impl UserStore for MemoryStore {
    fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock()?;
        if inner.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict);
        }
        inner.next_user_id += 1;
        let created = User {
            id: inner.next_user_id,
            username: user.username,
            password_hash: user.password_hash,
            password_salt: user.password_salt,
            role: user.role,
            join_date: user.join_date,
            banned: user.banned,
            online_status: user.online_status,
        };
        inner.users.push(created.clone());
        Ok(created)
    }

    fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.lock()?.users.clone())
    }

    fn set_banned(&self, username: &str, banned: bool) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.users.iter_mut().find(|u| u.username == username) {
            Some(u) => {
                u.banned = banned;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_user(&self, username: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.users.len();
        inner.users.retain(|u| u.username != username);
        Ok(inner.users.len() != before)
    }

    fn set_online(&self, username: &str, online: bool) -> Result<(), StoreError> {
        if let Some(u) = self
            .lock()?
            .users
            .iter_mut()
            .find(|u| u.username == username)
        {
            u.online_status = online;
        }
        Ok(())
    }

    fn reset_online(&self) -> Result<(), StoreError> {
        for u in self.lock()?.users.iter_mut() {
            u.online_status = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ROLE_USER;
    use chrono::Duration;

    fn at(secs: i64, content: &str) -> ChatMessage {
        ChatMessage {
            content: content.to_string(),
            sender: "alice".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            password_hash: "h".to_string(),
            password_salt: "s".to_string(),
            role: ROLE_USER.to_string(),
            join_date: Utc::now(),
            banned: false,
            online_status: false,
        }
    }

    #[test]
    fn recent_messages_are_oldest_first_and_capped() {
        let store = MemoryStore::new();
        for (secs, c) in [(30, "c"), (10, "a"), (40, "d"), (20, "b")] {
            store.persist_message(&at(secs, c)).unwrap();
        }
        let recent = store.fetch_recent_messages(None, 3).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c", "d"]);
        assert!(recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn recent_messages_respect_since() {
        let store = MemoryStore::new();
        for (secs, c) in [(10, "a"), (20, "b"), (30, "c")] {
            store.persist_message(&at(secs, c)).unwrap();
        }
        let since = at(20, "").timestamp;
        let recent = store.fetch_recent_messages(Some(since), 50).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "b");

        let later = since + Duration::seconds(100);
        assert!(store.fetch_recent_messages(Some(later), 50).unwrap().is_empty());
    }

    #[test]
    fn duplicate_username_conflicts() {
        let store = MemoryStore::new();
        store.create_user(new_user("alice")).unwrap();
        assert!(matches!(
            store.create_user(new_user("alice")),
            Err(StoreError::Conflict)
        ));
    }

    #[test]
    fn ban_and_delete_report_missing_users() {
        let store = MemoryStore::new();
        store.create_user(new_user("bob")).unwrap();
        assert!(store.set_banned("bob", true).unwrap());
        assert!(store.find_user("bob").unwrap().unwrap().banned);
        assert!(!store.set_banned("nobody", true).unwrap());
        assert!(store.delete_user("bob").unwrap());
        assert!(!store.delete_user("bob").unwrap());
    }
}
