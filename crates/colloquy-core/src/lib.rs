//! Colloquy core crate - shared types, errors, and configuration.
//!
//! Every other crate in the workspace depends on this one. It defines the
//! chat data model (chats, messages, roles), the top-level error enum, and
//! the TOML-backed application configuration.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ColloquyError, Result};
