//! Room repository backed by `SQLite`

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use uuid::Uuid;

use super::{DbConn, DbPool, SessionStore};
use crate::conversation::Turn;
use crate::{Error, Result};

/// A coaching room as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub topic: String,
    pub mode: String,
    pub persona: String,
    pub conversation: Vec<Turn>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ROOM_COLUMNS: &str =
    "id, topic, mode, persona, conversation, completed, created_at, updated_at";

/// Room store over an r2d2 `SQLite` pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Create a new room store
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open an in-memory store (for testing and dry runs)
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn in_memory() -> Result<Self> {
        super::init_memory().map(Self::new)
    }

    /// Run `work` on a pooled connection off the async runtime
    async fn with_conn<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DbConn) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
            work(&conn)
        })
        .await
        .map_err(|e| Error::Database(format!("storage worker failed: {e}")))?
    }
}

fn find(conn: &DbConn, room_id: &str) -> Result<Option<Room>> {
    let room = conn
        .query_row(
            &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
            [room_id],
            row_to_room,
        )
        .optional()?;

    Ok(room)
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create(&self, topic: &str, mode: &str, persona: &str) -> Result<Room> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let room = Room {
            id,
            topic: topic.to_string(),
            mode: mode.to_string(),
            persona: persona.to_string(),
            conversation: Vec::new(),
            completed: false,
            created_at: now,
            updated_at: now,
        };

        let row = room.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO rooms (id, topic, mode, persona, conversation, completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, '[]', 0, ?5, ?5)",
                rusqlite::params![row.id, row.topic, row.mode, row.persona, format_datetime(now)],
            )?;
            Ok(())
        })
        .await?;

        tracing::info!(room = %room.id, topic, mode, persona, "room created");
        Ok(room)
    }

    async fn get(&self, room_id: &str) -> Result<Room> {
        let id = room_id.to_string();
        self.with_conn(move |conn| find(conn, &id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("room {room_id}")))
    }

    async fn list(&self) -> Result<Vec<Room>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROOM_COLUMNS} FROM rooms ORDER BY updated_at DESC"
            ))?;
            let rooms = stmt
                .query_map([], row_to_room)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rooms)
        })
        .await
    }

    async fn load(&self, room_id: &str) -> Result<Vec<Turn>> {
        let id = room_id.to_string();
        let room = self.with_conn(move |conn| find(conn, &id)).await?;
        Ok(room.map(|room| room.conversation).unwrap_or_default())
    }

    async fn save(&self, room_id: &str, conversation: &[Turn], completed: bool) -> Result<()> {
        let json = serde_json::to_string(conversation)?;
        let id = room_id.to_string();

        let updated = self
            .with_conn(move |conn| {
                let updated = conn.execute(
                    "UPDATE rooms
                     SET conversation = ?1,
                         completed = CASE WHEN ?2 THEN 1 ELSE completed END,
                         updated_at = ?3
                     WHERE id = ?4",
                    rusqlite::params![json, completed, format_datetime(Utc::now()), id],
                )?;
                Ok(updated)
            })
            .await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("room {room_id}")));
        }

        tracing::debug!(room = room_id, turns = conversation.len(), completed, "conversation saved");
        Ok(())
    }
}

/// Map a row, failing on a conversation column that is not a turn array
fn row_to_room(row: &Row<'_>) -> rusqlite::Result<Room> {
    let conversation_json: String = row.get(4)?;
    let conversation = serde_json::from_str(&conversation_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Room {
        id: row.get(0)?,
        topic: row.get(1)?,
        mode: row.get(2)?,
        persona: row.get(3)?,
        conversation,
        completed: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
