//! Streams generated text into editable surface messages.
//!
//! One accumulator serves one turn. It owns at most one live outbound
//! message, edits it as chunks arrive, and rolls over to a fresh message
//! whenever the next write would push it past the surface's length ceiling.

use std::sync::Arc;

use super::chat_surface::{ChannelKind, ChatSurface, MessageHandle, SurfaceError};

pub const DISCORD_MESSAGE_CHAR_LIMIT: usize = 2000;
pub const EPHEMERAL_MARKER: &str = "...";
pub const RESPONSE_THREAD_NAME: &str = "Discollama Says";
pub const RESPONSE_THREAD_AUTO_ARCHIVE_MINUTES: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where the triggering message lives.
pub struct ResponseOrigin {
    pub channel_id: String,
    pub channel_kind: ChannelKind,
    pub message_id: String,
}

#[derive(Debug)]
struct OutboundMessage {
    handle: MessageHandle,
    last_content: String,
}

/// Per-turn writer that turns chunk text into surface creates and edits.
pub struct ResponseAccumulator {
    surface: Arc<dyn ChatSurface>,
    origin: ResponseOrigin,
    char_limit: usize,
    buffer: String,
    current: Option<OutboundMessage>,
    delivery_channel_id: Option<String>,
    messages_sent: usize,
}

impl ResponseAccumulator {
    pub fn new(surface: Arc<dyn ChatSurface>, origin: ResponseOrigin, char_limit: usize) -> Self {
        let marker_chars = EPHEMERAL_MARKER.chars().count();
        Self {
            surface,
            origin,
            char_limit: char_limit.max(marker_chars + 1),
            buffer: String::new(),
            current: None,
            delivery_channel_id: None,
            messages_sent: 0,
        }
    }

    /// Channel that receives (or will receive) the response messages.
    pub fn delivery_channel_id(&self) -> &str {
        self.delivery_channel_id
            .as_deref()
            .unwrap_or(&self.origin.channel_id)
    }

    pub fn messages_sent(&self) -> usize {
        self.messages_sent
    }

    pub fn current_message(&self) -> Option<&MessageHandle> {
        self.current.as_ref().map(|current| &current.handle)
    }

    /// Appends `text` and mirrors the buffer onto the surface.
    ///
    /// Ephemeral writes carry the trailing marker on edits. Text that would
    /// overflow the live message detaches it and starts a new one; text that
    /// is too long for any single message is split across several.
    pub async fn write(&mut self, text: &str, ephemeral: bool) -> Result<(), SurfaceError> {
        let marker_chars = if ephemeral {
            EPHEMERAL_MARKER.chars().count()
        } else {
            0
        };
        let capacity = self.char_limit - marker_chars;
        let mut remaining = text;

        loop {
            let buffered = self.buffer.chars().count();
            if buffered + remaining.chars().count() <= capacity {
                self.buffer.push_str(remaining);
                return self.publish(ephemeral).await;
            }

            if buffered > 0 {
                self.detach().await?;
                continue;
            }

            // Split pieces are published final, so they may use the full limit.
            let split_at = byte_offset_for_chars(remaining, self.char_limit);
            let (head, tail) = remaining.split_at(split_at);
            self.buffer.push_str(head);
            self.publish(false).await?;
            self.detach().await?;
            remaining = tail;
        }
    }

    async fn publish(&mut self, ephemeral: bool) -> Result<(), SurfaceError> {
        let value = self.buffer.trim();
        if value.is_empty() {
            return Ok(());
        }

        if let Some(current) = self.current.as_mut() {
            let mut content = value.to_string();
            if ephemeral {
                content.push_str(EPHEMERAL_MARKER);
            }
            if content == current.last_content {
                return Ok(());
            }
            self.surface.edit_message(&current.handle, &content).await?;
            current.last_content = content;
            return Ok(());
        }

        let value = value.to_string();
        let channel_id = self.resolve_delivery_channel().await?;
        let handle = self.surface.send_message(&channel_id, &value).await?;
        self.messages_sent = self.messages_sent.saturating_add(1);
        tracing::debug!(
            channel_id = %handle.channel_id,
            message_id = %handle.message_id,
            chars = value.chars().count(),
            "response message created"
        );
        self.current = Some(OutboundMessage {
            handle,
            last_content: value,
        });
        Ok(())
    }

    // Finalizes the live message (dropping any marker) and starts over.
    async fn detach(&mut self) -> Result<(), SurfaceError> {
        if let Some(current) = self.current.take() {
            let value = self.buffer.trim();
            if !value.is_empty() && current.last_content != value {
                self.surface.edit_message(&current.handle, value).await?;
            }
            tracing::debug!(
                message_id = %current.handle.message_id,
                "response message detached on overflow"
            );
        }
        self.buffer.clear();
        Ok(())
    }

    async fn resolve_delivery_channel(&mut self) -> Result<String, SurfaceError> {
        if let Some(channel_id) = &self.delivery_channel_id {
            return Ok(channel_id.clone());
        }

        let channel_id = if self.origin.channel_kind.opens_thread() {
            let thread_id = self
                .surface
                .create_thread(
                    &self.origin.channel_id,
                    &self.origin.message_id,
                    RESPONSE_THREAD_NAME,
                    RESPONSE_THREAD_AUTO_ARCHIVE_MINUTES,
                )
                .await?;
            tracing::debug!(
                channel_id = %self.origin.channel_id,
                thread_id = %thread_id,
                "response thread created"
            );
            thread_id
        } else {
            self.origin.channel_id.clone()
        };
        self.delivery_channel_id = Some(channel_id.clone());
        Ok(channel_id)
    }
}

fn byte_offset_for_chars(value: &str, chars: usize) -> usize {
    value
        .char_indices()
        .nth(chars)
        .map_or(value.len(), |(offset, _)| offset)
}
