//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- One row per coaching room
        CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            mode TEXT NOT NULL,
            persona TEXT NOT NULL,
            conversation TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        PRAGMA user_version = 1;
        ",
    )?;

    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Soft completion instead of deletion
        ALTER TABLE rooms ADD COLUMN completed INTEGER NOT NULL DEFAULT 0;

        CREATE INDEX IF NOT EXISTS idx_rooms_updated ON rooms(updated_at);

        PRAGMA user_version = 2;
        ",
    )?;

    Ok(())
}
