//! Repository implementations for SQLite-backed persistence.
//!
//! `ChatRepository` and `MessageRepository` operate on the shared
//! `Database` using raw SQL. Ownership checks happen in the queries:
//! a chat that exists but belongs to someone else is indistinguishable
//! from one that does not exist.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use colloquy_core::error::ColloquyError;
use colloquy_core::types::{Chat, Message, Role};

use crate::db::Database;

/// Convert a stored microsecond timestamp back into a `DateTime<Utc>`.
fn from_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id: String = row.get(0)?;
    let owner_id: String = row.get(1)?;
    let title: Option<String> = row.get(2)?;
    let created_at: i64 = row.get(3)?;
    let updated_at: i64 = row.get(4)?;
    Ok(Chat {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        title,
        owner_id: Some(owner_id),
        created_at: from_micros(created_at),
        updated_at: from_micros(updated_at),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let chat_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let metadata: Option<String> = row.get(4)?;
    let created_at: i64 = row.get(5)?;
    Ok(Message {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        chat_id: Uuid::parse_str(&chat_id).unwrap_or_default(),
        role: Role::parse(&role).unwrap_or(Role::User),
        content,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: from_micros(created_at),
    })
}

const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, metadata, created_at";
const CHAT_COLUMNS: &str = "id, owner_id, title, created_at, updated_at";

// =============================================================================
// ChatRepository
// =============================================================================

/// Repository for durable chat records.
pub struct ChatRepository {
    db: Arc<Database>,
}

impl ChatRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new chat. The chat must carry an owner.
    pub fn insert(&self, chat: &Chat) -> Result<(), ColloquyError> {
        let owner = chat.owner_id.as_deref().ok_or_else(|| {
            ColloquyError::Storage("Cannot persist a chat without an owner".to_string())
        })?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (id, owner_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    chat.id.to_string(),
                    owner,
                    chat.title,
                    chat.created_at.timestamp_micros(),
                    chat.updated_at.timestamp_micros(),
                ],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to insert chat: {}", e)))?;
            Ok(())
        })
    }

    /// Find a chat by id, constrained to the given owner.
    pub fn find_owned(&self, id: Uuid, owner: &str) -> Result<Option<Chat>, ColloquyError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1 AND owner_id = ?2"),
                rusqlite::params![id.to_string(), owner],
                row_to_chat,
            )
            .optional()
            .map_err(|e| ColloquyError::Storage(e.to_string()))
        })
    }

    /// List all chats of an owner, most recently updated first.
    pub fn list_by_owner(&self, owner: &str) -> Result<Vec<Chat>, ColloquyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {CHAT_COLUMNS} FROM chats
                     WHERE owner_id = ?1
                     ORDER BY updated_at DESC"
                ))
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![owner], row_to_chat)
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let mut chats = Vec::new();
            for row in rows {
                chats.push(row.map_err(|e| ColloquyError::Storage(e.to_string()))?);
            }
            Ok(chats)
        })
    }

    /// Rename a chat. Returns false when the chat is absent or not owned.
    pub fn rename(&self, id: Uuid, owner: &str, title: &str) -> Result<bool, ColloquyError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE chats SET title = ?1, updated_at = ?2
                     WHERE id = ?3 AND owner_id = ?4",
                    rusqlite::params![
                        title,
                        Utc::now().timestamp_micros(),
                        id.to_string(),
                        owner
                    ],
                )
                .map_err(|e| ColloquyError::Storage(format!("Failed to rename chat: {}", e)))?;
            Ok(changed > 0)
        })
    }

    /// Delete a chat and, via cascade, its messages. Returns false when the
    /// chat is absent or not owned.
    pub fn delete(&self, id: Uuid, owner: &str) -> Result<bool, ColloquyError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "DELETE FROM chats WHERE id = ?1 AND owner_id = ?2",
                    rusqlite::params![id.to_string(), owner],
                )
                .map_err(|e| ColloquyError::Storage(format!("Failed to delete chat: {}", e)))?;
            Ok(changed > 0)
        })
    }

    /// Count all chats (all owners).
    pub fn count(&self) -> Result<u64, ColloquyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// =============================================================================
// MessageRepository
// =============================================================================

/// Repository for persisted messages.
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a message to a chat and bump the chat's `updated_at`.
    ///
    /// `created_at` is forced strictly greater than the chat's current
    /// newest message, so sequential appends always order correctly even
    /// when the clock does not advance between them. Both statements run
    /// under the connection mutex, so the append is atomic per process.
    pub fn append(
        &self,
        chat_id: Uuid,
        role: Role,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<Message, ColloquyError> {
        self.db.with_conn(|conn| {
            let last: Option<i64> = conn
                .query_row(
                    "SELECT MAX(created_at) FROM messages WHERE chat_id = ?1",
                    rusqlite::params![chat_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            let now = Utc::now().timestamp_micros();
            let created_at = match last {
                Some(prev) if now <= prev => prev + 1,
                _ => now,
            };

            let message = Message {
                id: Uuid::new_v4(),
                chat_id,
                role,
                content: content.to_string(),
                metadata: metadata.cloned(),
                created_at: from_micros(created_at),
            };

            let metadata_json = message
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m))
                .transpose()
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            conn.execute(
                "INSERT INTO messages (id, chat_id, role, content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.id.to_string(),
                    chat_id.to_string(),
                    role.as_str(),
                    message.content,
                    metadata_json,
                    created_at,
                ],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to append message: {}", e)))?;

            conn.execute(
                "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![created_at, chat_id.to_string()],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to touch chat: {}", e)))?;

            Ok(message)
        })
    }

    /// Insert a message verbatim, preserving its id and timestamp.
    ///
    /// Used by ephemeral-chat migration, where the history is already
    /// ordered and must keep its original creation times.
    pub fn insert(&self, message: &Message) -> Result<(), ColloquyError> {
        self.db.with_conn(|conn| {
            let metadata_json = message
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m))
                .transpose()
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;

            conn.execute(
                "INSERT INTO messages (id, chat_id, role, content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.id.to_string(),
                    message.chat_id.to_string(),
                    message.role.as_str(),
                    message.content,
                    metadata_json,
                    message.created_at.timestamp_micros(),
                ],
            )
            .map_err(|e| ColloquyError::Storage(format!("Failed to insert message: {}", e)))?;
            Ok(())
        })
    }

    /// Fetch messages of a chat in creation order.
    ///
    /// With `limit = Some(n)` only the newest `n` messages are returned
    /// (still in ascending order); `None` returns everything.
    pub fn list(&self, chat_id: Uuid, limit: Option<u64>) -> Result<Vec<Message>, ColloquyError> {
        self.db.with_conn(|conn| {
            let mut messages = match limit {
                Some(n) => {
                    let mut stmt = conn
                        .prepare(&format!(
                            "SELECT {MESSAGE_COLUMNS} FROM messages
                             WHERE chat_id = ?1
                             ORDER BY created_at DESC
                             LIMIT ?2"
                        ))
                        .map_err(|e| ColloquyError::Storage(e.to_string()))?;
                    let rows = stmt
                        .query_map(rusqlite::params![chat_id.to_string(), n], row_to_message)
                        .map_err(|e| ColloquyError::Storage(e.to_string()))?;
                    let mut out = Vec::new();
                    for row in rows {
                        out.push(row.map_err(|e| ColloquyError::Storage(e.to_string()))?);
                    }
                    out.reverse();
                    out
                }
                None => {
                    let mut stmt = conn
                        .prepare(&format!(
                            "SELECT {MESSAGE_COLUMNS} FROM messages
                             WHERE chat_id = ?1
                             ORDER BY created_at ASC"
                        ))
                        .map_err(|e| ColloquyError::Storage(e.to_string()))?;
                    let rows = stmt
                        .query_map(rusqlite::params![chat_id.to_string()], row_to_message)
                        .map_err(|e| ColloquyError::Storage(e.to_string()))?;
                    let mut out = Vec::new();
                    for row in rows {
                        out.push(row.map_err(|e| ColloquyError::Storage(e.to_string()))?);
                    }
                    out
                }
            };
            // Guard against identical stored timestamps from external writers.
            messages.sort_by_key(|m| m.created_at);
            Ok(messages)
        })
    }

    /// Count messages in a chat.
    pub fn count(&self, chat_id: Uuid) -> Result<u64, ColloquyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
                    rusqlite::params![chat_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ColloquyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
