//! Chat-surface seam shared by the Discord transport and the turn pipeline.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `SurfaceError` values.
pub enum SurfaceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("discord api {operation} failed with status {status}: {body}")]
    HttpStatus {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid discord response: {0}")]
    InvalidResponse(String),
    #[error("invalid discord configuration: {0}")]
    InvalidConfig(String),
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Coarse channel classification used to decide where replies land.
pub enum ChannelKind {
    GuildText,
    Thread,
    DirectMessage,
    Other,
}

impl ChannelKind {
    /// Maps a Discord channel `type` code.
    pub fn from_discord_type(code: u64) -> Self {
        match code {
            0 | 5 => Self::GuildText,
            10..=12 => Self::Thread,
            1 | 3 => Self::DirectMessage,
            _ => Self::Other,
        }
    }

    /// Whether a reply should open a dedicated thread instead of posting inline.
    pub fn opens_thread(self) -> bool {
        matches!(self, Self::GuildText)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GuildText => "guild_text",
            Self::Thread => "thread",
            Self::DirectMessage => "direct_message",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Address of a single message on the surface.
pub struct MessageHandle {
    pub channel_id: String,
    pub message_id: String,
}

impl MessageHandle {
    pub fn new(channel_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }
}

#[async_trait]
/// Trait contract for the chat surface a turn talks to.
///
/// `add_reaction`, `remove_own_reaction` and `trigger_typing` are best-effort:
/// callers inspect the result only to log it.
pub trait ChatSurface: Send + Sync {
    async fn send_message(&self, channel_id: &str, content: &str)
        -> Result<MessageHandle, SurfaceError>;

    async fn edit_message(&self, handle: &MessageHandle, content: &str) -> Result<(), SurfaceError>;

    /// Opens a thread rooted at `message_id` and returns the thread's channel id.
    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
        auto_archive_minutes: u32,
    ) -> Result<String, SurfaceError>;

    async fn fetch_message_content(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<String, SurfaceError>;

    async fn add_reaction(&self, target: &MessageHandle, emoji: &str) -> Result<(), SurfaceError>;

    async fn remove_own_reaction(
        &self,
        target: &MessageHandle,
        emoji: &str,
    ) -> Result<(), SurfaceError>;

    async fn trigger_typing(&self, channel_id: &str) -> Result<(), SurfaceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The message an inbound message replies to.
pub struct ReplyReference {
    pub message_id: String,
    /// Referenced text when the gateway delivered it inline.
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `InboundMessage` delivered by the surface's event source.
pub struct InboundMessage {
    pub message_id: String,
    pub channel_id: String,
    pub channel_kind: ChannelKind,
    pub author_id: String,
    pub content: String,
    pub reply_to: Option<ReplyReference>,
    pub mentions_self: bool,
}

impl InboundMessage {
    pub fn handle(&self) -> MessageHandle {
        MessageHandle::new(self.channel_id.clone(), self.message_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Typed events produced by a surface session.
pub enum SurfaceEvent {
    Ready {
        user_id: String,
        application_id: String,
    },
    MessageReceived(InboundMessage),
}
