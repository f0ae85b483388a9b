//! Colloquy chat crate - the request orchestrator and ephemeral registry.
//!
//! `ChatOrchestrator` sequences every send-message request: validate,
//! authorize, persist the user message, generate (streaming or not,
//! optionally through the tool loop), persist the assistant message.
//! `EphemeralRegistry` holds anonymous chats in memory with a background
//! expiry sweep.

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod registry;

pub use error::ChatError;
pub use events::StreamEvent;
pub use orchestrator::{Audience, ChatOrchestrator, ToolSupport};
pub use registry::{EphemeralChat, EphemeralRegistry};
