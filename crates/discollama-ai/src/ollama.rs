use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;

use crate::{
    retry::{is_retryable_http_error, parse_retry_after_ms, retry_delay_ms, should_retry_status},
    ContextBlob, FragmentStream, GenerateFragment, GenerateRequest, GenerationBackend,
    GenerationError,
};

const KEEP_ALIVE_INDEFINITE: i64 = -1;

#[derive(Debug, Clone)]
/// Public struct `OllamaConfig` used to build an [`OllamaClient`].
pub struct OllamaConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub max_retries: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            connect_timeout_ms: 10_000,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
/// Streaming client for the Ollama `/api/generate` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, GenerationError> {
        if config.base_url.trim().is_empty() {
            return Err(GenerationError::InvalidResponse(
                "ollama base url must not be empty".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Generations can legitimately stream for minutes, so only the connect
        // phase is bounded.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms.max(1)))
            .build()?;

        Ok(Self { client, config })
    }

    fn generate_url(&self) -> String {
        let base = self.config.base_url.trim().trim_end_matches('/');
        if base.ends_with("/api/generate") {
            return base.to_string();
        }
        format!("{base}/api/generate")
    }
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    async fn generate(&self, request: GenerateRequest) -> Result<FragmentStream, GenerationError> {
        let url = self.generate_url();
        let body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "context": request.context.tokens(),
            "stream": true,
            "keep_alive": KEEP_ALIVE_INDEFINITE,
        });

        let mut attempt = 0_usize;
        loop {
            let response = self
                .client
                .post(&url)
                .header("x-discollama-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        tracing::debug!(
                            model = %request.model,
                            context_tokens = request.context.len(),
                            attempt,
                            "ollama generation stream opened"
                        );
                        return Ok(Box::pin(decode_fragment_stream(response)));
                    }

                    let retry_after = parse_retry_after_ms(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.config.max_retries && should_retry_status(status.as_u16()) {
                        let delay_ms = retry_delay_ms(attempt, retry_after);
                        tracing::debug!(
                            status = status.as_u16(),
                            attempt,
                            delay_ms,
                            "retrying ollama generate request"
                        );
                        sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return Err(GenerationError::HttpStatus {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_http_error(&error) {
                        let delay_ms = retry_delay_ms(attempt, None);
                        tracing::debug!(
                            %error,
                            attempt,
                            delay_ms,
                            "retrying ollama generate request after transport error"
                        );
                        sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    return Err(GenerationError::Http(error));
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaWireFragment {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    context: Option<Vec<i64>>,
    #[serde(default)]
    error: Option<String>,
}

/// Decodes one newline-delimited JSON line of an Ollama generate stream.
///
/// Blank lines decode to `None`. A line carrying an `error` field becomes
/// [`GenerationError::Backend`].
pub fn decode_fragment_line(line: &[u8]) -> Result<Option<GenerateFragment>, GenerationError> {
    let text = std::str::from_utf8(line).map_err(|error| {
        GenerationError::InvalidResponse(format!("invalid UTF-8 in generate stream: {error}"))
    })?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let wire = serde_json::from_str::<OllamaWireFragment>(text).map_err(|error| {
        GenerationError::InvalidResponse(format!(
            "failed to parse generate stream line: {error}: {}",
            truncate_for_error(text, 240)
        ))
    })?;
    if let Some(message) = wire.error {
        return Err(GenerationError::Backend(message));
    }

    Ok(Some(GenerateFragment {
        response: wire.response,
        done: wire.done,
        context: wire.context.map(ContextBlob::new),
    }))
}

fn decode_fragment_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<GenerateFragment, GenerationError>> + Send {
    async_stream::try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(GenerationError::Http)?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buffer.iter().position(|byte| *byte == b'\n') {
                let line = buffer.drain(..=pos).collect::<Vec<u8>>();
                if let Some(fragment) = decode_fragment_line(&line)? {
                    yield fragment;
                }
            }
        }

        if let Some(fragment) = decode_fragment_line(&buffer)? {
            yield fragment;
        }
    }
}

fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
