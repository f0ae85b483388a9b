//! Database schema migrations.
//!
//! Applies the initial schema: chats, messages, and the migrations
//! tracking table. Timestamps are stored as INTEGER microseconds since
//! the Unix epoch so that message ordering survives the round trip.

use rusqlite::Connection;
use tracing::info;

use colloquy_core::error::ColloquyError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental
/// changes.
pub fn run_migrations(conn: &Connection) -> Result<(), ColloquyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ColloquyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ColloquyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), ColloquyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chats (
            id          TEXT PRIMARY KEY NOT NULL,
            owner_id    TEXT NOT NULL,
            title       TEXT,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chats_owner
            ON chats (owner_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY NOT NULL,
            chat_id     TEXT NOT NULL
                        REFERENCES chats (id) ON DELETE CASCADE,
            role        TEXT NOT NULL
                        CHECK (role IN ('user', 'assistant', 'system')),
            content     TEXT NOT NULL,
            metadata    TEXT,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages (chat_id, created_at);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ColloquyError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
