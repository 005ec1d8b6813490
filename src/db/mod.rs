//! Room persistence
//!
//! The pipeline only needs a narrow CRUD surface, expressed by
//! [`SessionStore`]. [`SqliteStore`] backs it with an r2d2 pool.

mod room;
mod schema;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::conversation::Turn;
use crate::{Error, Result};

pub use room::{Room, SqliteStore};
pub use schema::SCHEMA_VERSION;

/// How long a writer waits on a locked database
const BUSY_TIMEOUT: Duration = Duration::from_secs(3);

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Narrow CRUD interface over the room store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a room for a topic, coaching mode and persona
    async fn create(&self, topic: &str, mode: &str, persona: &str) -> Result<Room>;

    /// Fetch the full room record
    async fn get(&self, room_id: &str) -> Result<Room>;

    /// All rooms, most recently updated first
    async fn list(&self) -> Result<Vec<Room>>;

    /// Last saved conversation, empty if none was ever saved
    async fn load(&self, room_id: &str) -> Result<Vec<Turn>>;

    /// Replace the stored conversation and bump the timestamp
    ///
    /// `completed = true` marks the room finished; `false` leaves the flag as is.
    async fn save(&self, room_id: &str, conversation: &[Turn], completed: bool) -> Result<()>;
}

/// Initialize the database
///
/// # Errors
///
/// Returns error if database cannot be opened or initialized
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    // Run migrations on first connection
    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    tracing::info!(version = SCHEMA_VERSION, "database initialized");
    Ok(pool)
}

/// Pragmas applied to every pooled file connection
fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")
}

/// Initialize an in-memory database (for testing)
///
/// # Errors
///
/// Returns error if database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory() {
        let pool = init_memory().unwrap();
        let _conn = pool.get().unwrap();
    }

    #[test]
    fn test_init_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init(dir.path().join("coach.db")).unwrap();
        let conn = pool.get().unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_store_handles_concurrent_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(init(dir.path().join("coach.db")).unwrap());
        let room = store.create("Rust", "Question Bank", "Tina").await.unwrap();

        let saves = (0..8).map(|i| {
            let store = store.clone();
            let id = room.id.clone();
            tokio::spawn(async move {
                store.save(&id, &[Turn::user(format!("turn {i}"))], false).await
            })
        });
        for save in futures::future::join_all(saves).await {
            save.unwrap().unwrap();
        }

        // Last write wins: exactly one snapshot survives
        let stored = store.load(&room.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].content.starts_with("turn "));
    }
}
