//! One mention-to-completion cycle.

use std::{fmt, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use discollama_ai::{
    batch_fragments, Chunk, ContextBlob, GenerateRequest, GenerationBackend,
    DEFAULT_CHUNK_INTERVAL,
};
use discollama_state::{ContextStore, ConversationAnchor};
use futures_util::StreamExt;

use super::chat_surface::{ChatSurface, InboundMessage};
use super::indicator::{IndicatorHandle, DEFAULT_INDICATOR_TIMEOUT};
use super::response_accumulator::{
    ResponseAccumulator, ResponseOrigin, DISCORD_MESSAGE_CHAR_LIMIT,
};

pub const GREETING_PROMPT: &str = "Hi!";
pub const REPLY_CONTEXT_INSTRUCTION: &str =
    "Use this to answer the question if it is relevant, otherwise ignore it:";

#[derive(Debug, Clone)]
/// Immutable per-process settings shared by every turn.
pub struct TurnSettings {
    pub model: String,
    pub chunk_interval: Duration,
    pub message_char_limit: usize,
    pub indicator_timeout: Duration,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            model: "llama2".to_string(),
            chunk_interval: DEFAULT_CHUNK_INTERVAL,
            message_char_limit: DISCORD_MESSAGE_CHAR_LIMIT,
            indicator_timeout: DEFAULT_INDICATOR_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    ResolvingContext,
    Generating,
    Finalizing,
    Done,
}

impl TurnState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingContext => "resolving_context",
            Self::Generating => "generating",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Summary of a completed turn.
pub struct TurnOutcome {
    pub delivery_channel_id: String,
    pub chunk_count: usize,
    pub messages_sent: usize,
    pub context_tokens: usize,
}

/// Whether `message` should start a turn for the bot identified by `bot_user_id`.
pub fn should_respond(message: &InboundMessage, bot_user_id: &str) -> bool {
    message.author_id != bot_user_id && message.mentions_self
}

/// Removes both `<@id>` and `<@!id>` mention forms and trims the result.
pub fn strip_self_mention(content: &str, bot_user_id: &str) -> String {
    content
        .replace(&format!("<@{bot_user_id}>"), "")
        .replace(&format!("<@!{bot_user_id}>"), "")
        .trim()
        .to_string()
}

/// Prompt for a reply whose target carries no stored context.
pub fn render_reply_fallback_prompt(prompt: &str, referenced_content: &str) -> String {
    format!("{prompt}\n{REPLY_CONTEXT_INSTRUCTION}\n{referenced_content}")
}

/// Drives a single turn. Construct one per qualifying message.
pub struct TurnOrchestrator {
    surface: Arc<dyn ChatSurface>,
    backend: Arc<dyn GenerationBackend>,
    store: ContextStore,
    settings: Arc<TurnSettings>,
    state: TurnState,
}

impl TurnOrchestrator {
    pub fn new(
        surface: Arc<dyn ChatSurface>,
        backend: Arc<dyn GenerationBackend>,
        store: ContextStore,
        settings: Arc<TurnSettings>,
    ) -> Self {
        Self {
            surface,
            backend,
            store,
            settings,
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    #[tracing::instrument(
        name = "turn",
        skip_all,
        fields(channel_id = %message.channel_id, message_id = %message.message_id)
    )]
    pub async fn run(&mut self, message: &InboundMessage, bot_user_id: &str) -> Result<TurnOutcome> {
        let outcome = self.drive(message, bot_user_id).await;
        self.transition(TurnState::Done);
        outcome
    }

    async fn drive(&mut self, message: &InboundMessage, bot_user_id: &str) -> Result<TurnOutcome> {
        self.transition(TurnState::ResolvingContext);
        let (prompt, context) = self.resolve_context(message, bot_user_id).await?;

        self.transition(TurnState::Generating);
        let mut accumulator = ResponseAccumulator::new(
            self.surface.clone(),
            ResponseOrigin {
                channel_id: message.channel_id.clone(),
                channel_kind: message.channel_kind,
                message_id: message.message_id.clone(),
            },
            self.settings.message_char_limit,
        );
        let indicator = IndicatorHandle::start(
            self.surface.clone(),
            message.handle(),
            self.settings.indicator_timeout,
        );
        let generated = self.generate(prompt, context, &mut accumulator, &indicator).await;
        indicator.finish().await;

        let (final_context, chunk_count) = match generated {
            Ok(generated) => generated,
            Err(error) => {
                // Leave the partial response without the streaming marker.
                if let Err(cleanup_error) = accumulator.write("", false).await {
                    tracing::debug!(%cleanup_error, "failed to finalize partial response");
                }
                return Err(error);
            }
        };

        self.transition(TurnState::Finalizing);
        accumulator
            .write("", false)
            .await
            .context("failed to finalize response message")?;
        self.store
            .save_turn(
                accumulator.delivery_channel_id(),
                &message.message_id,
                &final_context,
            )
            .await
            .context("failed to persist conversation context")?;

        Ok(TurnOutcome {
            delivery_channel_id: accumulator.delivery_channel_id().to_string(),
            chunk_count,
            messages_sent: accumulator.messages_sent(),
            context_tokens: final_context.len(),
        })
    }

    async fn resolve_context(
        &self,
        message: &InboundMessage,
        bot_user_id: &str,
    ) -> Result<(String, ContextBlob)> {
        let mut prompt = strip_self_mention(&message.content, bot_user_id);
        if prompt.is_empty() {
            prompt = GREETING_PROMPT.to_string();
        }

        if let Some(reply) = &message.reply_to {
            let context = self
                .store
                .load(&ConversationAnchor::message(reply.message_id.clone()))
                .await
                .context("failed to load reply context")?;
            if !context.is_empty() {
                return Ok((prompt, context));
            }

            let referenced = match &reply.content {
                Some(content) => content.clone(),
                None => self
                    .surface
                    .fetch_message_content(&message.channel_id, &reply.message_id)
                    .await
                    .context("failed to fetch referenced message")?,
            };
            tracing::debug!(
                referenced_message_id = %reply.message_id,
                "reply target has no stored context; inlining referenced text"
            );
            return Ok((
                render_reply_fallback_prompt(&prompt, &referenced),
                ContextBlob::default(),
            ));
        }

        let context = self
            .store
            .load(&ConversationAnchor::channel(message.channel_id.clone()))
            .await
            .context("failed to load channel context")?;
        Ok((prompt, context))
    }

    async fn generate(
        &self,
        prompt: String,
        context: ContextBlob,
        accumulator: &mut ResponseAccumulator,
        indicator: &IndicatorHandle,
    ) -> Result<(ContextBlob, usize)> {
        let fragments = self
            .backend
            .generate(GenerateRequest {
                model: self.settings.model.clone(),
                prompt,
                context,
            })
            .await
            .context("failed to start generation")?;
        let mut chunks = batch_fragments(fragments, self.settings.chunk_interval);

        let mut chunk_count = 0_usize;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.context("generation stream failed")?;
            indicator.cancel();
            chunk_count = chunk_count.saturating_add(1);
            accumulator
                .write(chunk.text(), !chunk.is_final())
                .await
                .context("failed to deliver response chunk")?;
            if let Chunk::Final { context, .. } = chunk {
                return Ok((context, chunk_count));
            }
        }
        bail!("generation stream ended without a final chunk")
    }

    fn transition(&mut self, next: TurnState) {
        tracing::debug!(from = %self.state, to = %next, "turn state transition");
        self.state = next;
    }
}
