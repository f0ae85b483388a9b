//! The stream orchestrator: request sequencing for every send-message flow.
//!
//! Four entry points (REST / streaming × owned / anonymous) share one
//! logical sequence: validate, authorize, persist the user message,
//! generate, persist the assistant message. Model overrides are validated
//! before anything is persisted. A persisted user message is never rolled
//! back; failures reference the chat id instead.
//!
//! Known race, documented rather than fixed: two concurrent sends against
//! the same chat id may interleave their history reads, so each may
//! generate without seeing the other's messages. Persisted order remains
//! well-defined (last write wins).

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use colloquy_core::types::{derive_title, Chat, ChatWithMessages, Message, Role};
use colloquy_llm::{LlmError, LlmGateway};
use colloquy_tools::{ToolProvider, ToolRunner};
use colloquy_store::{ChatRepository, Database, MessageRepository};

use crate::error::ChatError;
use crate::events::StreamEvent;
use crate::registry::EphemeralRegistry;

/// Default message window for chat fetches.
const DEFAULT_MESSAGE_LIMIT: u64 = 50;

/// Who a request acts as.
#[derive(Clone, Debug)]
pub enum Audience {
    /// An authenticated caller; chats are resolved against the store with
    /// an ownership check.
    Owner(String),
    /// An anonymous caller; chats are resolved against the registry.
    Anonymous,
}

/// Tool augmentation wiring, present when the deployment enables it.
pub struct ToolSupport {
    pub provider: Arc<dyn ToolProvider>,
    pub runner: ToolRunner,
    /// When true, tool augmentation is skipped for requests that carry no
    /// delegated credential.
    pub require_credential: bool,
}

/// Central coordinator for all chat operations.
pub struct ChatOrchestrator {
    chats: ChatRepository,
    messages: MessageRepository,
    registry: Arc<EphemeralRegistry>,
    gateway: Arc<LlmGateway>,
    tools: Option<ToolSupport>,
}

impl ChatOrchestrator {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<EphemeralRegistry>,
        gateway: Arc<LlmGateway>,
        tools: Option<ToolSupport>,
    ) -> Self {
        Self {
            chats: ChatRepository::new(Arc::clone(&db)),
            messages: MessageRepository::new(db),
            registry,
            gateway,
            tools,
        }
    }

    pub fn gateway(&self) -> &LlmGateway {
        &self.gateway
    }

    // =========================================================================
    // Chat CRUD
    // =========================================================================

    /// Create a durable chat; an initial message runs the full generation
    /// cycle synchronously.
    pub async fn create_chat(
        &self,
        owner: &str,
        title: Option<String>,
        initial: Option<&str>,
        model: Option<&str>,
        credential: Option<&str>,
    ) -> Result<ChatWithMessages, ChatError> {
        if let Some(content) = initial {
            validate_content(content)?;
        }
        if let Some(name) = model {
            self.gateway.resolve_model(Some(name))?;
        }

        let title = title.or_else(|| initial.map(derive_title));
        let chat = Chat::durable(owner, title);
        self.chats.insert(&chat)?;

        let audience = Audience::Owner(owner.to_string());
        if let Some(content) = initial {
            self.generate_and_persist(&audience, chat.id, content, model, credential)
                .await?;
        }

        self.get_chat(owner, chat.id, None)
    }

    /// Create an ephemeral chat; an initial message runs the full
    /// generation cycle synchronously.
    pub async fn create_anonymous_chat(
        &self,
        title: Option<String>,
        initial: Option<&str>,
        model: Option<&str>,
    ) -> Result<ChatWithMessages, ChatError> {
        if let Some(content) = initial {
            validate_content(content)?;
        }
        if let Some(name) = model {
            self.gateway.resolve_model(Some(name))?;
        }

        let title = title.or_else(|| initial.map(derive_title));
        let chat = self.registry.create(title)?;

        if let Some(content) = initial {
            // Anonymous flows never carry a delegated credential.
            self.generate_and_persist(&Audience::Anonymous, chat.id, content, model, None)
                .await?;
        }

        let entry = self
            .registry
            .get(chat.id)?
            .ok_or(ChatError::ChatNotFound(chat.id))?;
        Ok(ChatWithMessages {
            chat: entry.chat,
            messages: entry.messages,
        })
    }

    /// List the caller's chats, most recently updated first.
    pub fn list_chats(&self, owner: &str) -> Result<Vec<Chat>, ChatError> {
        Ok(self.chats.list_by_owner(owner)?)
    }

    /// Fetch a chat and a window of its messages.
    ///
    /// `limit`: `None` applies the default window, `Some(0)` means
    /// unlimited, anything else caps the window at the newest N messages.
    pub fn get_chat(
        &self,
        owner: &str,
        chat_id: Uuid,
        limit: Option<u64>,
    ) -> Result<ChatWithMessages, ChatError> {
        let chat = self
            .chats
            .find_owned(chat_id, owner)?
            .ok_or(ChatError::ChatNotFound(chat_id))?;

        let effective = match limit {
            None => Some(DEFAULT_MESSAGE_LIMIT),
            Some(0) => None,
            Some(n) => Some(n),
        };
        let messages = self.messages.list(chat_id, effective)?;
        Ok(ChatWithMessages { chat, messages })
    }

    pub fn rename_chat(&self, owner: &str, chat_id: Uuid, title: &str) -> Result<(), ChatError> {
        if self.chats.rename(chat_id, owner, title)? {
            Ok(())
        } else {
            Err(ChatError::ChatNotFound(chat_id))
        }
    }

    pub fn delete_chat(&self, owner: &str, chat_id: Uuid) -> Result<(), ChatError> {
        if self.chats.delete(chat_id, owner)? {
            Ok(())
        } else {
            Err(ChatError::ChatNotFound(chat_id))
        }
    }

    /// Bulk-adopt ephemeral chats into durable storage under `owner`.
    ///
    /// Unknown or already-swept ids are skipped silently; the returned
    /// list contains only the chats actually adopted.
    pub fn migrate(&self, owner: &str, chat_ids: &[Uuid]) -> Result<Vec<Chat>, ChatError> {
        let mut adopted = Vec::new();
        for &chat_id in chat_ids {
            let Some(entry) = self.registry.remove(chat_id)? else {
                debug!(%chat_id, "Skipping unknown ephemeral chat during migration");
                continue;
            };

            let chat = Chat {
                owner_id: Some(owner.to_string()),
                ..entry.chat
            };
            self.chats.insert(&chat)?;
            for message in &entry.messages {
                self.messages.insert(message)?;
            }
            adopted.push(chat);
        }
        Ok(adopted)
    }

    // =========================================================================
    // Send (REST flavor)
    // =========================================================================

    /// Handle a REST send: blocks until the full assistant reply is
    /// persisted and returns it.
    pub async fn send_message(
        &self,
        audience: &Audience,
        chat_id: Uuid,
        content: &str,
        model: Option<&str>,
        credential: Option<&str>,
    ) -> Result<Message, ChatError> {
        validate_content(content)?;
        if let Some(name) = model {
            self.gateway.resolve_model(Some(name))?;
        }
        self.resolve_chat(audience, chat_id)?;
        self.generate_and_persist(audience, chat_id, content, model, credential)
            .await
    }

    // =========================================================================
    // Send (streaming flavor)
    // =========================================================================

    /// Handle a streaming send.
    ///
    /// Validation, authorization, and the user-message write happen before
    /// this returns, so those failures surface as plain errors. The
    /// returned stream then yields `chunk` events and ends with exactly one
    /// `done` or `error` event. Tool augmentation is bypassed entirely.
    pub async fn stream_message(
        self: Arc<Self>,
        audience: Audience,
        chat_id: Uuid,
        content: &str,
        model: Option<&str>,
    ) -> Result<ReceiverStream<StreamEvent>, ChatError> {
        validate_content(content)?;
        if let Some(name) = model {
            self.gateway.resolve_model(Some(name))?;
        }
        self.resolve_chat(&audience, chat_id)?;
        self.append(&audience, chat_id, Role::User, content, None)?;

        let history = self.history(&audience, chat_id)?;
        let fragments = self
            .gateway
            .stream_complete(&history, model)
            .await
            .map_err(|e| ChatError::Generation {
                chat_id,
                source: e,
            })?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            self.pump_stream(audience, chat_id, fragments, tx).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Forward fragments to the caller, then persist the full text.
    ///
    /// A dropped receiver means the caller disconnected: forwarding stops
    /// and the accumulated partial text is persisted best-effort. An
    /// upstream error likewise persists the partial text, then emits an
    /// `error` event; no `done` event follows either way.
    async fn pump_stream(
        &self,
        audience: Audience,
        chat_id: Uuid,
        mut fragments: colloquy_llm::client::FragmentStream,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let mut buffer = String::new();

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    buffer.push_str(&fragment);
                    let event = StreamEvent::Chunk { content: fragment };
                    if tx.send(event).await.is_err() {
                        debug!(%chat_id, "Stream receiver dropped, abandoning forwarding");
                        self.persist_partial(&audience, chat_id, &buffer);
                        return;
                    }
                }
                Err(e) => {
                    warn!(%chat_id, error = %e, "Upstream stream failed");
                    self.persist_partial(&audience, chat_id, &buffer);
                    let _ = tx
                        .send(StreamEvent::Error {
                            error: format!(
                                "generation failed; chat {} retains your message",
                                chat_id
                            ),
                        })
                        .await;
                    return;
                }
            }
        }

        match self.append(&audience, chat_id, Role::Assistant, &buffer, None) {
            Ok(message) => {
                let _ = tx.send(StreamEvent::Done { message }).await;
            }
            Err(e) => {
                warn!(%chat_id, error = %e, "Failed to persist streamed reply");
                let _ = tx
                    .send(StreamEvent::Error {
                        error: format!(
                            "failed to persist the reply; chat {} retains your message",
                            chat_id
                        ),
                    })
                    .await;
            }
        }
    }

    /// Best-effort persistence of a partial streamed reply.
    fn persist_partial(&self, audience: &Audience, chat_id: Uuid, buffer: &str) {
        if buffer.is_empty() {
            return;
        }
        let metadata = serde_json::json!({"partial": true});
        if let Err(e) = self.append(audience, chat_id, Role::Assistant, buffer, Some(metadata)) {
            warn!(%chat_id, error = %e, "Failed to persist partial reply");
        }
    }

    // =========================================================================
    // Shared pipeline steps
    // =========================================================================

    /// Persist the user message, generate, persist the assistant message.
    async fn generate_and_persist(
        &self,
        audience: &Audience,
        chat_id: Uuid,
        content: &str,
        model: Option<&str>,
        credential: Option<&str>,
    ) -> Result<Message, ChatError> {
        self.append(audience, chat_id, Role::User, content, None)?;
        let history = self.history(audience, chat_id)?;

        let text = self
            .generate_reply(&history, model, credential)
            .await
            .map_err(|e| ChatError::Generation {
                chat_id,
                source: e,
            })?;

        self.append(audience, chat_id, Role::Assistant, &text, None)
    }

    /// Produce the assistant text, through the tool loop when available.
    ///
    /// Tool failures never surface: the loop's error triggers a fallback
    /// to a plain completion before final success is decided.
    async fn generate_reply(
        &self,
        history: &[Message],
        model: Option<&str>,
        credential: Option<&str>,
    ) -> Result<String, LlmError> {
        if let Some(tools) = &self.tools {
            let permitted = credential.is_some() || !tools.require_credential;
            if permitted {
                match tools
                    .runner
                    .respond(tools.provider.as_ref(), credential, history, model)
                    .await
                {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        warn!(error = %e, "Tool loop failed, falling back to plain completion");
                    }
                }
            }
        }
        self.gateway.complete(history, model).await.map(|c| c.content)
    }

    fn resolve_chat(&self, audience: &Audience, chat_id: Uuid) -> Result<Chat, ChatError> {
        match audience {
            Audience::Owner(owner) => self
                .chats
                .find_owned(chat_id, owner)?
                .ok_or(ChatError::ChatNotFound(chat_id)),
            Audience::Anonymous => self
                .registry
                .get(chat_id)?
                .map(|entry| entry.chat)
                .ok_or(ChatError::ChatNotFound(chat_id)),
        }
    }

    fn append(
        &self,
        audience: &Audience,
        chat_id: Uuid,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Message, ChatError> {
        match audience {
            Audience::Owner(_) => Ok(self
                .messages
                .append(chat_id, role, content, metadata.as_ref())?),
            Audience::Anonymous => self.registry.append(chat_id, role, content, metadata),
        }
    }

    fn history(&self, audience: &Audience, chat_id: Uuid) -> Result<Vec<Message>, ChatError> {
        match audience {
            Audience::Owner(_) => Ok(self.messages.list(chat_id, None)?),
            Audience::Anonymous => Ok(self
                .registry
                .get(chat_id)?
                .map(|entry| entry.messages)
                .unwrap_or_default()),
        }
    }
}

fn validate_content(content: &str) -> Result<(), ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
