//! Discord bridge runtime that feeds gateway events into per-turn tasks.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use discollama_ai::GenerationBackend;
use discollama_state::ContextStore;
use tokio::{sync::mpsc, task::JoinSet};

mod chat_surface;
mod discord_api_client;
mod discord_gateway;
mod indicator;
mod response_accumulator;
mod turn_orchestrator;

pub use chat_surface::{
    ChannelKind, ChatSurface, InboundMessage, MessageHandle, ReplyReference, SurfaceError,
    SurfaceEvent,
};
pub use discord_api_client::{DiscordApiClient, DiscordApiConfig, DISCORD_API_BASE};
pub use discord_gateway::{
    decode_gateway_payload, render_invite_url, DiscordGateway, DiscordGatewayConfig,
    GatewayPayload, DEFAULT_CHANNEL_LOOKUP_TIMEOUT, DISCORD_GATEWAY_URL, GATEWAY_INTENTS,
    INVITE_PERMISSIONS,
};
pub use indicator::{
    IndicatorExit, IndicatorHandle, DEFAULT_INDICATOR_TIMEOUT, THINKING_REACTION,
    TYPING_REFRESH_INTERVAL,
};
pub use response_accumulator::{
    ResponseAccumulator, ResponseOrigin, DISCORD_MESSAGE_CHAR_LIMIT, EPHEMERAL_MARKER,
    RESPONSE_THREAD_AUTO_ARCHIVE_MINUTES, RESPONSE_THREAD_NAME,
};
pub use turn_orchestrator::{
    render_reply_fallback_prompt, should_respond, strip_self_mention, TurnOrchestrator,
    TurnOutcome, TurnSettings, TurnState, GREETING_PROMPT, REPLY_CONTEXT_INSTRUCTION,
};

const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
/// Runtime configuration for the Discord bridge.
pub struct BridgeRuntimeConfig {
    pub turn: TurnSettings,
    pub bot_token: String,
    pub api_base: String,
    pub gateway_url: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub reconnect_delay: Duration,
}

/// Connects to Discord and serves mentions until shutdown.
pub async fn run_discord_bridge(
    config: BridgeRuntimeConfig,
    backend: Arc<dyn GenerationBackend>,
    store: ContextStore,
) -> Result<()> {
    let api = DiscordApiClient::new(DiscordApiConfig {
        api_base: config.api_base.clone(),
        bot_token: config.bot_token.clone(),
        request_timeout_ms: config.request_timeout_ms,
        retry_max_attempts: config.retry_max_attempts,
        retry_base_delay_ms: config.retry_base_delay_ms,
    })
    .context("failed to create discord api client")?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let mut gateway = DiscordGateway::new(
        DiscordGatewayConfig {
            gateway_url: config.gateway_url.clone(),
            bot_token: config.bot_token.clone(),
            intents: GATEWAY_INTENTS,
            reconnect_delay: config.reconnect_delay,
            channel_lookup_timeout: DEFAULT_CHANNEL_LOOKUP_TIMEOUT,
        },
        api.clone(),
    );
    let gateway_task = tokio::spawn(async move { gateway.run(events_tx).await });

    let mut runtime = BridgeRuntime::new(Arc::new(api), backend, store, config.turn);
    let result = runtime.run(events_rx).await;
    gateway_task.abort();
    result
}

/// Consumes surface events and runs one [`TurnOrchestrator`] per qualifying mention.
pub struct BridgeRuntime {
    surface: Arc<dyn ChatSurface>,
    backend: Arc<dyn GenerationBackend>,
    store: ContextStore,
    settings: Arc<TurnSettings>,
    bot_user_id: Option<String>,
    turns: JoinSet<()>,
}

impl BridgeRuntime {
    pub fn new(
        surface: Arc<dyn ChatSurface>,
        backend: Arc<dyn GenerationBackend>,
        store: ContextStore,
        settings: TurnSettings,
    ) -> Self {
        Self {
            surface,
            backend,
            store,
            settings: Arc::new(settings),
            bot_user_id: None,
            turns: JoinSet::new(),
        }
    }

    pub fn bot_user_id(&self) -> Option<&str> {
        self.bot_user_id.as_deref()
    }

    pub fn in_flight_turns(&self) -> usize {
        self.turns.len()
    }

    /// Runs until ctrl-c or until `events` closes. In-flight turns are drained
    /// when the event source closes and aborted on ctrl-c.
    pub async fn run(&mut self, mut events: mpsc::Receiver<SurfaceEvent>) -> Result<()> {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(in_flight = self.turns.len(), "discollama shutdown requested");
                    self.turns.abort_all();
                    return Ok(());
                }
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        break;
                    };
                    self.handle_event(event);
                }
                Some(joined) = self.turns.join_next(), if !self.turns.is_empty() => {
                    log_turn_join(joined);
                }
            }
        }

        while let Some(joined) = self.turns.join_next().await {
            log_turn_join(joined);
        }
        Ok(())
    }

    /// Applies one event. Returns `true` when a turn was spawned.
    pub fn handle_event(&mut self, event: SurfaceEvent) -> bool {
        match event {
            SurfaceEvent::Ready {
                user_id,
                application_id,
            } => {
                tracing::info!(%user_id, %application_id, "discord session ready");
                self.bot_user_id = Some(user_id);
                false
            }
            SurfaceEvent::MessageReceived(message) => {
                let Some(bot_user_id) = self.bot_user_id.clone() else {
                    tracing::debug!(
                        message_id = %message.message_id,
                        "dropping message received before ready"
                    );
                    return false;
                };
                if !should_respond(&message, &bot_user_id) {
                    return false;
                }
                self.spawn_turn(message, bot_user_id);
                true
            }
        }
    }

    fn spawn_turn(&mut self, message: InboundMessage, bot_user_id: String) {
        let mut orchestrator = TurnOrchestrator::new(
            self.surface.clone(),
            self.backend.clone(),
            self.store.clone(),
            self.settings.clone(),
        );
        self.turns.spawn(async move {
            match orchestrator.run(&message, &bot_user_id).await {
                Ok(outcome) => tracing::info!(
                    channel_id = %message.channel_id,
                    message_id = %message.message_id,
                    delivery_channel_id = %outcome.delivery_channel_id,
                    chunks = outcome.chunk_count,
                    messages = outcome.messages_sent,
                    context_tokens = outcome.context_tokens,
                    "turn completed"
                ),
                Err(error) => tracing::warn!(
                    channel_id = %message.channel_id,
                    message_id = %message.message_id,
                    error = %format!("{error:#}"),
                    "turn abandoned"
                ),
            }
        });
    }
}

fn log_turn_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(error) = joined {
        if !error.is_cancelled() {
            tracing::warn!(%error, "turn task panicked");
        }
    }
}
