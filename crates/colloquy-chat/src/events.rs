//! Stream events emitted while generating a response.

use serde::{Deserialize, Serialize};

use colloquy_core::types::Message;

/// One event on a streaming response channel.
///
/// Serialized with a `type` discriminator so the SSE layer can frame each
/// event as `data: <JSON>`. A channel either ends with exactly one `done`
/// or one `error` event, never both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A partial text fragment.
    Chunk { content: String },
    /// Terminal event carrying the persisted assistant message.
    Done { message: Message },
    /// Terminal event after a failure. No `done` follows.
    Error { error: String },
}
