//! Colloquy storage crate - SQLite-backed conversation store.
//!
//! Durable persistence for chats and messages of identified users. The
//! ephemeral (anonymous) side lives in `colloquy-chat`; this crate only
//! knows about owned records.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{ChatRepository, MessageRepository};
