use std::{fmt, sync::Arc, time::Duration};

use discollama_ai::ContextBlob;
use serde_json::Value;

use crate::{StateBackend, StateStoreError};

pub const STATE_KEY_PREFIX: &str = "discollama";
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Conversation anchor under which state is stored.
///
/// A channel anchor holds a pointer to the message that ended the latest
/// turn in that channel. A message anchor holds the context tokens produced
/// by the turn that message concluded.
pub enum ConversationAnchor {
    Channel(String),
    Message(String),
}

impl ConversationAnchor {
    pub fn channel(id: impl Into<String>) -> Self {
        Self::Channel(id.into())
    }

    pub fn message(id: impl Into<String>) -> Self {
        Self::Message(id.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Channel(_) => "channel",
            Self::Message(_) => "message",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Channel(id) | Self::Message(id) => id,
        }
    }

    pub fn state_key(&self) -> String {
        format!("{STATE_KEY_PREFIX}:{}:{}", self.kind(), self.id())
    }
}

impl fmt::Display for ConversationAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Clone)]
/// Reads and writes conversation context through a [`StateBackend`].
pub struct ContextStore {
    backend: Arc<dyn StateBackend>,
    ttl: Duration,
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ContextStore {
    pub fn new(backend: Arc<dyn StateBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records that the latest turn in `channel_id` ended at `message_id`.
    pub async fn save_channel_pointer(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), StateStoreError> {
        let anchor = ConversationAnchor::channel(channel_id);
        self.backend
            .set(
                &anchor.state_key(),
                &Value::String(message_id.to_string()),
                self.ttl,
            )
            .await
    }

    pub async fn save_message_context(
        &self,
        message_id: &str,
        context: &ContextBlob,
    ) -> Result<(), StateStoreError> {
        let anchor = ConversationAnchor::message(message_id);
        let value = serde_json::to_value(context)?;
        self.backend
            .set(&anchor.state_key(), &value, self.ttl)
            .await
    }

    /// Persists both records for a completed turn.
    ///
    /// The message record is written first so a reader that follows a fresh
    /// channel pointer always finds its target.
    pub async fn save_turn(
        &self,
        channel_id: &str,
        message_id: &str,
        context: &ContextBlob,
    ) -> Result<(), StateStoreError> {
        self.save_message_context(message_id, context).await?;
        self.save_channel_pointer(channel_id, message_id).await
    }

    /// Resolves the context tokens for `anchor`.
    ///
    /// Missing, expired and undecodable records all resolve to an empty
    /// context. Only backend failures surface as errors.
    pub async fn load(&self, anchor: &ConversationAnchor) -> Result<ContextBlob, StateStoreError> {
        match anchor {
            ConversationAnchor::Message(message_id) => self.load_message_context(message_id).await,
            ConversationAnchor::Channel(channel_id) => {
                let Some(message_id) = self.load_channel_pointer(channel_id).await? else {
                    return Ok(ContextBlob::default());
                };
                self.load_message_context(&message_id).await
            }
        }
    }

    pub async fn load_channel_pointer(
        &self,
        channel_id: &str,
    ) -> Result<Option<String>, StateStoreError> {
        let key = ConversationAnchor::channel(channel_id).state_key();
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let pointer = decode_channel_pointer(&raw);
        if pointer.is_none() {
            tracing::warn!(key = %key, "ignoring undecodable channel pointer");
        }
        Ok(pointer)
    }

    async fn load_message_context(&self, message_id: &str) -> Result<ContextBlob, StateStoreError> {
        let key = ConversationAnchor::message(message_id).state_key();
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(ContextBlob::default());
        };
        match serde_json::from_str::<ContextBlob>(&raw) {
            Ok(context) => Ok(context),
            Err(error) => {
                tracing::warn!(key = %key, %error, "ignoring undecodable message context");
                Ok(ContextBlob::default())
            }
        }
    }
}

// Pointers are written as JSON strings, but numeric ids are accepted too.
fn decode_channel_pointer(raw: &str) -> Option<String> {
    match serde_json::from_str::<Value>(raw).ok()? {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => id.as_u64().map(|id| id.to_string()),
        _ => None,
    }
}
