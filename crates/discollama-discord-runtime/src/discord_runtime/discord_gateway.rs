//! Discord gateway session that turns websocket dispatches into [`SurfaceEvent`]s.

use std::{collections::HashMap, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    sync::mpsc,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::chat_surface::{
    ChannelKind, InboundMessage, ReplyReference, SurfaceError, SurfaceEvent,
};
use super::discord_api_client::DiscordApiClient;

pub const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

pub const INTENT_GUILDS: u64 = 1 << 0;
pub const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
pub const INTENT_DIRECT_MESSAGES: u64 = 1 << 12;
pub const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;
pub const GATEWAY_INTENTS: u64 =
    INTENT_GUILDS | INTENT_GUILD_MESSAGES | INTENT_DIRECT_MESSAGES | INTENT_MESSAGE_CONTENT;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const PERMISSION_VIEW_CHANNEL: u64 = 1 << 10;
const PERMISSION_SEND_MESSAGES: u64 = 1 << 11;
const PERMISSION_CREATE_PUBLIC_THREADS: u64 = 1 << 35;
pub const INVITE_PERMISSIONS: u64 =
    PERMISSION_VIEW_CHANNEL | PERMISSION_SEND_MESSAGES | PERMISSION_CREATE_PUBLIC_THREADS;

/// Upper bound for the channel lookup done inline with the session loop.
pub const DEFAULT_CHANNEL_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

const PRESENCE_NAME: &str = "Discollama";
const PRESENCE_STATE: &str = "Ask me anything!";
const ACTIVITY_TYPE_CUSTOM: u8 = 4;

#[derive(Debug, Clone, Deserialize)]
/// Raw gateway frame.
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelloData {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    user: DiscordUser,
    #[serde(default)]
    application: Option<DiscordApplication>,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DiscordApplication {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageCreateData {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: DiscordUser,
    #[serde(default)]
    content: String,
    #[serde(default)]
    mentions: Vec<DiscordUser>,
    #[serde(default)]
    message_reference: Option<MessageReferenceData>,
    #[serde(default)]
    referenced_message: Option<Box<ReferencedMessageData>>,
}

#[derive(Debug, Deserialize)]
struct MessageReferenceData {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReferencedMessageData {
    id: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone)]
/// Public struct `DiscordGatewayConfig` used by [`DiscordGateway`].
pub struct DiscordGatewayConfig {
    pub gateway_url: String,
    pub bot_token: String,
    pub intents: u64,
    pub reconnect_delay: Duration,
    pub channel_lookup_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Reconnect,
    InvalidSession,
    MissedHeartbeatAck,
    Shutdown,
}

/// Decodes one gateway text frame.
pub fn decode_gateway_payload(text: &str) -> Result<GatewayPayload, SurfaceError> {
    serde_json::from_str::<GatewayPayload>(text).map_err(|error| {
        SurfaceError::Gateway(format!("failed to parse gateway payload: {error}"))
    })
}

/// OAuth2 URL that installs the bot with the permissions it needs.
pub fn render_invite_url(application_id: &str) -> String {
    format!(
        "https://discord.com/oauth2/authorize?client_id={application_id}&scope=bot&permissions={INVITE_PERMISSIONS}"
    )
}

fn render_identify_payload(token: &str, intents: u64) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "discollama",
                "device": "discollama",
            },
            "presence": {
                "since": Value::Null,
                "status": "online",
                "afk": false,
                "activities": [{
                    "name": PRESENCE_NAME,
                    "state": PRESENCE_STATE,
                    "type": ACTIVITY_TYPE_CUSTOM,
                }],
            },
        },
    })
}

fn render_heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": sequence })
}

fn parse_ws_message(message: WsMessage) -> Result<Option<GatewayPayload>, SurfaceError> {
    match message {
        WsMessage::Text(text) => decode_gateway_payload(&text).map(Some),
        WsMessage::Binary(bytes) => {
            let text = std::str::from_utf8(&bytes).map_err(|error| {
                SurfaceError::Gateway(format!("invalid utf-8 gateway payload: {error}"))
            })?;
            decode_gateway_payload(text).map(Some)
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(None),
        WsMessage::Close(_) => Ok(None),
        WsMessage::Frame(_) => Ok(None),
    }
}

/// Long-lived gateway connection with reconnect handling.
pub struct DiscordGateway {
    config: DiscordGatewayConfig,
    api: DiscordApiClient,
    bot_user_id: Option<String>,
    sequence: Option<u64>,
    channel_kinds: HashMap<String, ChannelKind>,
}

impl DiscordGateway {
    pub fn new(config: DiscordGatewayConfig, api: DiscordApiClient) -> Self {
        Self {
            config,
            api,
            bot_user_id: None,
            sequence: None,
            channel_kinds: HashMap::new(),
        }
    }

    /// Connects and reconnects until `events` is closed.
    pub async fn run(&mut self, events: mpsc::Sender<SurfaceEvent>) -> Result<(), SurfaceError> {
        loop {
            match self.run_session(&events).await {
                Ok(SessionEnd::Shutdown) => return Ok(()),
                Ok(end) => {
                    tracing::info!(reason = ?end, "discord gateway session ended");
                }
                Err(error) => {
                    tracing::warn!(%error, "discord gateway session error");
                }
            }
            if events.is_closed() {
                return Ok(());
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn run_session(
        &mut self,
        events: &mpsc::Sender<SurfaceEvent>,
    ) -> Result<SessionEnd, SurfaceError> {
        let (stream, _response) = connect_async(self.config.gateway_url.as_str()).await?;
        let (mut sink, mut source) = stream.split();
        self.sequence = None;

        let heartbeat_period = loop {
            let Some(message) = source.next().await else {
                return Ok(SessionEnd::Closed);
            };
            let Some(payload) = parse_ws_message(message?)? else {
                continue;
            };
            if payload.op == OP_HELLO {
                let hello = serde_json::from_value::<HelloData>(payload.d)?;
                break Duration::from_millis(hello.heartbeat_interval.max(1));
            }
        };

        let identify = render_identify_payload(&self.config.bot_token, self.config.intents);
        sink.send(WsMessage::Text(identify.to_string().into())).await?;
        tracing::debug!(
            heartbeat_ms = heartbeat_period.as_millis() as u64,
            "discord gateway identified"
        );

        let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        return Ok(SessionEnd::MissedHeartbeatAck);
                    }
                    let beat = render_heartbeat_payload(self.sequence);
                    sink.send(WsMessage::Text(beat.to_string().into())).await?;
                    awaiting_ack = true;
                }
                maybe_message = source.next() => {
                    let Some(message) = maybe_message else {
                        return Ok(SessionEnd::Closed);
                    };
                    let Some(payload) = parse_ws_message(message?)? else {
                        continue;
                    };
                    if let Some(sequence) = payload.s {
                        self.sequence = Some(sequence);
                    }
                    match payload.op {
                        OP_DISPATCH => {
                            let kind = payload.t.unwrap_or_default();
                            match self.handle_dispatch(&kind, payload.d).await {
                                Ok(Some(event)) => {
                                    if events.send(event).await.is_err() {
                                        return Ok(SessionEnd::Shutdown);
                                    }
                                }
                                Ok(None) => {}
                                Err(error) => {
                                    tracing::warn!(event = %kind, %error, "skipping malformed dispatch");
                                }
                            }
                        }
                        OP_HEARTBEAT => {
                            let beat = render_heartbeat_payload(self.sequence);
                            sink.send(WsMessage::Text(beat.to_string().into())).await?;
                        }
                        OP_HEARTBEAT_ACK => awaiting_ack = false,
                        OP_RECONNECT => return Ok(SessionEnd::Reconnect),
                        OP_INVALID_SESSION => return Ok(SessionEnd::InvalidSession),
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_dispatch(
        &mut self,
        kind: &str,
        data: Value,
    ) -> Result<Option<SurfaceEvent>, SurfaceError> {
        match kind {
            "READY" => {
                let ready = serde_json::from_value::<ReadyData>(data)?;
                let application_id = ready
                    .application
                    .map(|application| application.id)
                    .unwrap_or_else(|| ready.user.id.clone());
                tracing::info!(
                    invite_url = %render_invite_url(&application_id),
                    "discollama ready"
                );
                self.bot_user_id = Some(ready.user.id.clone());
                Ok(Some(SurfaceEvent::Ready {
                    user_id: ready.user.id,
                    application_id,
                }))
            }
            "MESSAGE_CREATE" => {
                let message = serde_json::from_value::<MessageCreateData>(data)?;
                let channel_kind = self
                    .resolve_channel_kind(&message.channel_id, message.guild_id.is_some())
                    .await;
                Ok(Some(SurfaceEvent::MessageReceived(normalize_message_create(
                    message,
                    channel_kind,
                    self.bot_user_id.as_deref(),
                ))))
            }
            _ => Ok(None),
        }
    }

    async fn resolve_channel_kind(&mut self, channel_id: &str, in_guild: bool) -> ChannelKind {
        if !in_guild {
            return ChannelKind::DirectMessage;
        }
        if let Some(kind) = self.channel_kinds.get(channel_id) {
            return *kind;
        }
        let lookup = tokio::time::timeout(
            self.config.channel_lookup_timeout,
            self.api.fetch_channel_kind(channel_id),
        )
        .await;
        match lookup {
            Ok(Ok(kind)) => {
                self.channel_kinds.insert(channel_id.to_string(), kind);
                kind
            }
            Ok(Err(error)) => {
                tracing::warn!(channel_id, %error, "failed to resolve channel kind");
                ChannelKind::Other
            }
            Err(_) => {
                tracing::warn!(
                    channel_id,
                    timeout_ms = self.config.channel_lookup_timeout.as_millis() as u64,
                    "channel kind lookup timed out"
                );
                ChannelKind::Other
            }
        }
    }
}

fn normalize_message_create(
    message: MessageCreateData,
    channel_kind: ChannelKind,
    bot_user_id: Option<&str>,
) -> InboundMessage {
    let mentions_self = bot_user_id.is_some_and(|bot_user_id| {
        message
            .mentions
            .iter()
            .any(|mention| mention.id == bot_user_id)
    });
    let referenced = message.referenced_message;
    let reply_to = message
        .message_reference
        .and_then(|reference| reference.message_id)
        .or_else(|| referenced.as_ref().map(|referenced| referenced.id.clone()))
        .map(|message_id| ReplyReference {
            content: referenced
                .filter(|referenced| referenced.id == message_id)
                .map(|referenced| referenced.content),
            message_id,
        });

    InboundMessage {
        message_id: message.id,
        channel_id: message.channel_id,
        channel_kind,
        author_id: message.author.id,
        content: message.content,
        reply_to,
        mentions_self,
    }
}
