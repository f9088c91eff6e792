//! Postgres store over an r2d2 pool of diesel connections.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::DatabaseErrorKind;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use super::{MessageStore, StoreError, UserStore};
use crate::models::{ChatMessage, MessageRow, NewMessageRow, NewUser, User};
use crate::schema::{messages, users};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub struct PgStore {
    db: DbPool,
}

impl PgStore {
    /// Build the pool and run pending migrations.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let db = Pool::builder().build(manager)?;
        let store = Self { db };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, StoreError> {
        Ok(self.db.get()?)
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = &mut self.conn()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        if !applied.is_empty() {
            tracing::info!(count = applied.len(), "applied database migrations");
        }
        Ok(())
    }
}

impl MessageStore for PgStore {
    fn persist_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let conn = &mut self.conn()?;
        diesel::insert_into(messages::table)
            .values(NewMessageRow::from(message))
            .execute(conn)?;
        Ok(())
    }

    fn fetch_recent_messages(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        use crate::schema::messages::dsl;
        let conn = &mut self.conn()?;

        let mut query = messages::table
            .select(MessageRow::as_select())
            .into_boxed();
        if let Some(since) = since {
            query = query.filter(dsl::sent_at.ge(since));
        }
        let mut rows: Vec<MessageRow> = query
            .order((dsl::sent_at.desc(), dsl::id.desc()))
            .limit(limit)
            .load(conn)?;
        rows.reverse();
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    fn count_messages(&self) -> Result<i64, StoreError> {
        let conn = &mut self.conn()?;
        Ok(messages::table.count().get_result(conn)?)
    }
}

impl UserStore for PgStore {
    fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        use crate::schema::users::dsl;
        let conn = &mut self.conn()?;
        Ok(users::table
            .filter(dsl::username.eq(username))
            .select(User::as_select())
            .first(conn)
            .optional()?)
    }

    fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let conn = &mut self.conn()?;
        diesel::insert_into(users::table)
            .values(&user)
            .returning(User::as_returning())
            .get_result(conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    StoreError::Conflict
                }
                other => StoreError::Query(other),
            })
    }

    fn list_users(&self) -> Result<Vec<User>, StoreError> {
        use crate::schema::users::dsl;
        let conn = &mut self.conn()?;
        Ok(users::table
            .order(dsl::id.asc())
            .select(User::as_select())
            .load(conn)?)
    }

    fn set_banned(&self, username: &str, banned: bool) -> Result<bool, StoreError> {
        use crate::schema::users::dsl;
        let conn = &mut self.conn()?;
        let updated = diesel::update(users::table.filter(dsl::username.eq(username)))
            .set(dsl::banned.eq(banned))
            .execute(conn)?;
        Ok(updated > 0)
    }

    fn delete_user(&self, username: &str) -> Result<bool, StoreError> {
        use crate::schema::users::dsl;
        let conn = &mut self.conn()?;
        let deleted = diesel::delete(users::table.filter(dsl::username.eq(username)))
            .execute(conn)?;
        Ok(deleted > 0)
    }

    fn set_online(&self, username: &str, online: bool) -> Result<(), StoreError> {
        use crate::schema::users::dsl;
        let conn = &mut self.conn()?;
        diesel::update(users::table.filter(dsl::username.eq(username)))
            .set(dsl::online_status.eq(online))
            .execute(conn)?;
        Ok(())
    }

    fn reset_online(&self) -> Result<(), StoreError> {
        use crate::schema::users::dsl;
        let conn = &mut self.conn()?;
        diesel::update(users::table.filter(dsl::online_status.eq(true)))
            .set(dsl::online_status.eq(false))
            .execute(conn)?;
        Ok(())
    }
}
