//! Discord REST client backing the [`ChatSurface`] seam.

use std::time::Duration;

use async_trait::async_trait;
use discollama_ai::{is_retryable_http_error, parse_retry_after_ms};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::chat_surface::{ChannelKind, ChatSurface, MessageHandle, SurfaceError};

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Clone, Deserialize)]
struct DiscordMessageResponse {
    id: String,
    channel_id: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordChannelResponse {
    id: String,
    #[serde(rename = "type")]
    kind: u64,
}

#[derive(Debug, Deserialize)]
struct DiscordRateLimitBody {
    retry_after: Option<f64>,
}

#[derive(Debug, Clone)]
/// Public struct `DiscordApiConfig` used to build a [`DiscordApiClient`].
pub struct DiscordApiConfig {
    pub api_base: String,
    pub bot_token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for DiscordApiConfig {
    fn default() -> Self {
        Self {
            api_base: DISCORD_API_BASE.to_string(),
            bot_token: String::new(),
            request_timeout_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscordApiClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl DiscordApiClient {
    pub fn new(config: DiscordApiConfig) -> Result<Self, SurfaceError> {
        let token = normalize_bot_token(&config.bot_token);
        if token.is_empty() {
            return Err(SurfaceError::InvalidConfig(
                "discord bot token must not be empty".to_string(),
            ));
        }

        let mut authorization = reqwest::header::HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|error| {
                SurfaceError::InvalidConfig(format!("invalid discord bot token: {error}"))
            })?;
        authorization.set_sensitive(true);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, authorization);
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(concat!(
                "DiscordBot (discollama, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            )),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    pub async fn fetch_channel_kind(&self, channel_id: &str) -> Result<ChannelKind, SurfaceError> {
        let url = format!("{}/channels/{}", self.api_base, channel_id);
        let channel: DiscordChannelResponse = self
            .request_json("get channel", || self.http.get(&url))
            .await?;
        if channel.id != channel_id {
            tracing::debug!(
                requested = channel_id,
                returned = %channel.id,
                "discord returned a different channel id"
            );
        }
        Ok(ChannelKind::from_discord_type(channel.kind))
    }

    fn reaction_url(&self, target: &MessageHandle, emoji: &str) -> String {
        format!(
            "{}/channels/{}/messages/{}/reactions/{}/@me",
            self.api_base,
            target.channel_id,
            target.message_id,
            percent_encode_path_segment(emoji)
        )
    }

    async fn request_json<T, F>(&self, operation: &str, builder: F) -> Result<T, SurfaceError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(operation, builder).await?;
        let body = response.text().await?;
        serde_json::from_str::<T>(&body).map_err(|error| {
            SurfaceError::InvalidResponse(format!(
                "failed to decode discord {operation}: {error}: {}",
                truncate_for_error(&body, 240)
            ))
        })
    }

    async fn request_empty<F>(&self, operation: &str, builder: F) -> Result<(), SurfaceError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        self.send_with_retry(operation, builder).await.map(|_| ())
    }

    async fn send_with_retry<F>(
        &self,
        operation: &str,
        mut builder: F,
    ) -> Result<reqwest::Response, SurfaceError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header(
                    "x-discollama-retry-attempt",
                    attempt.saturating_sub(1).to_string(),
                )
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let header_retry_after = parse_retry_after_ms(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    let retry_after = header_retry_after.or_else(|| parse_body_retry_after_ms(&body));
                    if attempt < self.retry_max_attempts
                        && is_retryable_discord_status(status.as_u16())
                    {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, retry_after);
                        tracing::debug!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying discord api request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(SurfaceError::HttpStatus {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_http_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(SurfaceError::Http(error));
                }
            }
        }
    }
}

#[async_trait]
impl ChatSurface for DiscordApiClient {
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<MessageHandle, SurfaceError> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let body = json!({
            "content": content,
            "allowed_mentions": { "parse": [] },
        });
        let message: DiscordMessageResponse = self
            .request_json("create message", || self.http.post(&url).json(&body))
            .await?;
        Ok(MessageHandle::new(message.channel_id, message.id))
    }

    async fn edit_message(&self, handle: &MessageHandle, content: &str) -> Result<(), SurfaceError> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_base, handle.channel_id, handle.message_id
        );
        let body = json!({ "content": content });
        self.request_empty("edit message", || self.http.patch(&url).json(&body))
            .await
    }

    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
        auto_archive_minutes: u32,
    ) -> Result<String, SurfaceError> {
        let url = format!(
            "{}/channels/{}/messages/{}/threads",
            self.api_base, channel_id, message_id
        );
        let body = json!({
            "name": name,
            "auto_archive_duration": auto_archive_minutes,
        });
        let thread: DiscordChannelResponse = self
            .request_json("start thread", || self.http.post(&url).json(&body))
            .await?;
        Ok(thread.id)
    }

    async fn fetch_message_content(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<String, SurfaceError> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_base, channel_id, message_id
        );
        let message: DiscordMessageResponse = self
            .request_json("get message", || self.http.get(&url))
            .await?;
        Ok(message.content)
    }

    async fn add_reaction(&self, target: &MessageHandle, emoji: &str) -> Result<(), SurfaceError> {
        let url = self.reaction_url(target, emoji);
        self.request_empty("create reaction", || self.http.put(&url))
            .await
    }

    async fn remove_own_reaction(
        &self,
        target: &MessageHandle,
        emoji: &str,
    ) -> Result<(), SurfaceError> {
        let url = self.reaction_url(target, emoji);
        self.request_empty("delete own reaction", || self.http.delete(&url))
            .await
    }

    async fn trigger_typing(&self, channel_id: &str) -> Result<(), SurfaceError> {
        let url = format!("{}/channels/{}/typing", self.api_base, channel_id);
        self.request_empty("trigger typing", || self.http.post(&url))
            .await
    }
}

fn normalize_bot_token(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.strip_prefix("Bot ").unwrap_or(trimmed).trim()
}

fn is_retryable_discord_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

fn parse_body_retry_after_ms(body: &str) -> Option<u64> {
    let parsed = serde_json::from_str::<DiscordRateLimitBody>(body).ok()?;
    let seconds = parsed.retry_after?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).ceil() as u64)
}

fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after_ms: Option<u64>) -> Duration {
    let shift = attempt.saturating_sub(1).min(6) as u32;
    let backoff_ms = base_delay_ms.saturating_mul(1_u64 << shift);
    Duration::from_millis(retry_after_ms.map_or(backoff_ms, |value| value.max(backoff_ms)))
}

fn percent_encode_path_segment(value: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(value.len());
    for byte in value.as_bytes() {
        let is_unreserved = matches!(
            byte,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~'
        );
        if is_unreserved {
            encoded.push(*byte as char);
        } else {
            encoded.push('%');
            encoded.push(HEX[(byte >> 4) as usize] as char);
            encoded.push(HEX[(byte & 0x0F) as usize] as char);
        }
    }
    encoded
}

fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
