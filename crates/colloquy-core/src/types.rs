use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of an auto-derived chat title, in characters.
const MAX_TITLE_CHARS: usize = 48;

// =============================================================================
// Enums
// =============================================================================

/// The author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A message typed by the end user.
    User,
    /// A message produced by the model.
    Assistant,
    /// An instruction message; filtered out before the upstream call.
    System,
}

impl Role {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown roles.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// A single chat message. Immutable once persisted.
///
/// Ordering contract: within one chat, messages are strictly ordered by
/// `created_at`; the stores enforce monotonicity on append.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a new message stamped with the current time.
    pub fn new(chat_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            role,
            content: content.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Build a user message.
    pub fn user(chat_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(chat_id, Role::User, content)
    }

    /// Build an assistant message.
    pub fn assistant(chat_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(chat_id, Role::Assistant, content)
    }

    /// Attach structured metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// =============================================================================
// Chat
// =============================================================================

/// A conversation container.
///
/// Durable chats carry `owner_id = Some(user)`; ephemeral chats have no
/// owner and exist only inside the in-memory registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    /// Build a durable chat owned by `owner`.
    pub fn durable(owner: impl Into<String>, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            owner_id: Some(owner.into()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build an ephemeral (ownerless) chat.
    pub fn ephemeral(title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            owner_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A chat together with (a window of) its ordered messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatWithMessages {
    pub chat: Chat,
    pub messages: Vec<Message>,
}

// =============================================================================
// Helpers
// =============================================================================

/// Derive a chat title from the first user message.
///
/// Collapses whitespace and truncates to a character boundary with an
/// ellipsis when the content is long.
pub fn derive_title(content: &str) -> String {
    let collapsed: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_TITLE_CHARS {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    format!("{}…", truncated.trim_end())
}
