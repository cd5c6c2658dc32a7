use clap::Parser;

use crate::cli_types::CliStateStoreBackend;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "discollama",
    about = "Discord bot that answers mentions with a local Ollama model",
    version
)]
/// Public struct `Cli` parsed once at startup.
pub struct Cli {
    #[arg(
        long = "ollama-model",
        env = "OLLAMA_MODEL",
        default_value = "llama2",
        help = "Ollama model used for every generation"
    )]
    pub ollama_model: String,

    #[arg(
        long = "ollama-base-url",
        env = "OLLAMA_HOST",
        default_value = "http://127.0.0.1:11434",
        help = "Base URL of the Ollama server"
    )]
    pub ollama_base_url: String,

    #[arg(
        long = "ollama-max-retries",
        env = "DISCOLLAMA_OLLAMA_MAX_RETRIES",
        default_value_t = 2,
        help = "Retries for opening a generation stream (0 disables retries)"
    )]
    pub ollama_max_retries: usize,

    #[arg(
        long = "discord-token",
        env = "DISCORD_TOKEN",
        hide_env_values = true,
        help = "Discord bot token"
    )]
    pub discord_token: Option<String>,

    #[arg(
        long = "discord-api-base",
        env = "DISCOLLAMA_DISCORD_API_BASE",
        default_value = "https://discord.com/api/v10",
        help = "Discord REST API base URL"
    )]
    pub discord_api_base: String,

    #[arg(
        long = "discord-gateway-url",
        env = "DISCOLLAMA_DISCORD_GATEWAY_URL",
        default_value = "wss://gateway.discord.gg/?v=10&encoding=json",
        help = "Discord gateway websocket URL"
    )]
    pub discord_gateway_url: String,

    #[arg(
        long = "state-store",
        env = "DISCOLLAMA_STATE_STORE",
        value_enum,
        default_value = "dapr",
        help = "Where conversation context is kept (dapr sidecar or process memory)"
    )]
    pub state_store: CliStateStoreBackend,

    #[arg(
        long = "dapr-base-url",
        env = "DAPR_HTTP_ENDPOINT",
        default_value = "http://127.0.0.1:3500",
        help = "Base URL of the Dapr sidecar HTTP API"
    )]
    pub dapr_base_url: String,

    #[arg(
        long = "dapr-store-name",
        env = "DISCOLLAMA_DAPR_STORE_NAME",
        default_value = "dev-statestore",
        help = "Dapr state store component name"
    )]
    pub dapr_store_name: String,

    #[arg(
        long = "dapr-api-token",
        env = "DAPR_API_TOKEN",
        hide_env_values = true,
        help = "Optional Dapr API token sent as dapr-api-token"
    )]
    pub dapr_api_token: Option<String>,

    #[arg(
        long = "context-ttl-seconds",
        env = "DISCOLLAMA_CONTEXT_TTL_SECONDS",
        default_value_t = 604_800,
        value_parser = parse_positive_u64,
        help = "Retention window for stored conversation context"
    )]
    pub context_ttl_seconds: u64,

    #[arg(
        long = "chunk-interval-ms",
        env = "DISCOLLAMA_CHUNK_INTERVAL_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Maximum time generated text is buffered before the response message is edited"
    )]
    pub chunk_interval_ms: u64,

    #[arg(
        long = "message-char-limit",
        env = "DISCOLLAMA_MESSAGE_CHAR_LIMIT",
        default_value_t = 2_000,
        value_parser = parse_positive_usize,
        help = "Character ceiling for a single Discord message"
    )]
    pub message_char_limit: usize,

    #[arg(
        long = "indicator-timeout-seconds",
        env = "DISCOLLAMA_INDICATOR_TIMEOUT_SECONDS",
        default_value_t = 999,
        value_parser = parse_positive_u64,
        help = "Upper bound for the thinking reaction and typing indicator"
    )]
    pub indicator_timeout_seconds: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "DISCOLLAMA_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for Discord and Dapr HTTP requests, and for connecting to Ollama"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "DISCOLLAMA_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts per Discord API request before giving up"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "DISCOLLAMA_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff between Discord API retries"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "reconnect-delay-ms",
        env = "DISCOLLAMA_RECONNECT_DELAY_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Delay before reconnecting a dropped gateway session"
    )]
    pub reconnect_delay_ms: u64,
}
