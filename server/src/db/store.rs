//! Message Store: durable message inserts and the presence mirror.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::models::PresenceRow;
use crate::db::DbPool;
use crate::dm::message::{format_timestamp, Message};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("DB lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Persistence collaborator used by the pipeline and the presence writer.
///
/// Methods are synchronous; async callers run them on the blocking pool.
pub trait MessageStore: Send + Sync + 'static {
    fn insert(&self, message: &Message) -> Result<(), StoreError>;

    fn set_online(&self, user_id: &str, online: bool, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Refresh last_seen without touching the online flag.
    fn update_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn presence(&self, user_id: &str) -> Result<Option<PresenceRow>, StoreError>;
}

/// SQLite-backed store sharing the server's connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", raw, e)))
}

impl MessageStore for SqliteStore {
    fn insert(&self, message: &Message) -> Result<(), StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, type, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                message.id,
                message.sender_id,
                message.receiver_id,
                message.content,
                message.kind.as_str(),
                message.read,
                format_timestamp(&message.created_at),
            ],
        )?;
        Ok(())
    }

    fn set_online(&self, user_id: &str, online: bool, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO presence (user_id, online, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET online = excluded.online, last_seen = excluded.last_seen",
            rusqlite::params![user_id, online, format_timestamp(&at)],
        )?;
        Ok(())
    }

    fn update_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO presence (user_id, online, last_seen) VALUES (?1, 0, ?2)
             ON CONFLICT(user_id) DO UPDATE SET last_seen = excluded.last_seen",
            rusqlite::params![user_id, format_timestamp(&at)],
        )?;
        Ok(())
    }

    fn presence(&self, user_id: &str) -> Result<Option<PresenceRow>, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        let row = conn.query_row(
            "SELECT online, last_seen FROM presence WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| Ok((row.get::<_, bool>(0)?, row.get::<_, String>(1)?)),
        );

        match row {
            Ok((online, last_seen)) => Ok(Some(PresenceRow {
                user_id: user_id.to_string(),
                online,
                last_seen: parse_timestamp(&last_seen)?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
