use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use discollama_ai::{OllamaClient, OllamaConfig};
use discollama_discord_runtime::{
    run_discord_bridge, BridgeRuntimeConfig, TurnSettings, EPHEMERAL_MARKER,
};
use discollama_state::{
    ContextStore, DaprStateBackend, DaprStateConfig, MemoryStateBackend, StateBackend,
};

use crate::cli_args::Cli;
use crate::cli_types::CliStateStoreBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StateStoreSelection {
    Dapr(DaprStateConfig),
    Memory,
}

#[derive(Debug, Clone)]
/// Process configuration resolved once from the command line and environment.
pub(crate) struct DiscollamaConfig {
    pub(crate) ollama: OllamaConfig,
    pub(crate) state_store: StateStoreSelection,
    pub(crate) context_ttl: Duration,
    pub(crate) bridge: BridgeRuntimeConfig,
}

impl DiscollamaConfig {
    pub(crate) fn from_cli(cli: Cli) -> Result<Self> {
        let bot_token = cli
            .discord_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .context("--discord-token (or DISCORD_TOKEN) is required")?;
        if cli.ollama_model.trim().is_empty() {
            bail!("--ollama-model cannot be empty");
        }
        if cli.message_char_limit <= EPHEMERAL_MARKER.chars().count() {
            bail!(
                "--message-char-limit must be greater than {}",
                EPHEMERAL_MARKER.chars().count()
            );
        }

        let state_store = match cli.state_store {
            CliStateStoreBackend::Dapr => StateStoreSelection::Dapr(DaprStateConfig {
                base_url: cli.dapr_base_url,
                store_name: cli.dapr_store_name,
                api_token: cli
                    .dapr_api_token
                    .filter(|token| !token.trim().is_empty()),
                request_timeout_ms: cli.request_timeout_ms,
            }),
            CliStateStoreBackend::Memory => StateStoreSelection::Memory,
        };

        Ok(Self {
            ollama: OllamaConfig {
                base_url: cli.ollama_base_url,
                connect_timeout_ms: cli.request_timeout_ms,
                max_retries: cli.ollama_max_retries,
            },
            state_store,
            context_ttl: Duration::from_secs(cli.context_ttl_seconds),
            bridge: BridgeRuntimeConfig {
                turn: TurnSettings {
                    model: cli.ollama_model.trim().to_string(),
                    chunk_interval: Duration::from_millis(cli.chunk_interval_ms),
                    message_char_limit: cli.message_char_limit,
                    indicator_timeout: Duration::from_secs(cli.indicator_timeout_seconds),
                },
                bot_token,
                api_base: cli.discord_api_base,
                gateway_url: cli.discord_gateway_url,
                request_timeout_ms: cli.request_timeout_ms,
                retry_max_attempts: cli.retry_max_attempts,
                retry_base_delay_ms: cli.retry_base_delay_ms,
                reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
            },
        })
    }

    pub(crate) fn build_context_store(&self) -> Result<ContextStore> {
        let backend: Arc<dyn StateBackend> = match &self.state_store {
            StateStoreSelection::Dapr(config) => Arc::new(
                DaprStateBackend::new(config.clone())
                    .context("failed to create dapr state backend")?,
            ),
            StateStoreSelection::Memory => {
                tracing::warn!("using in-memory context store; conversations reset on restart");
                Arc::new(MemoryStateBackend::new())
            }
        };
        Ok(ContextStore::new(backend, self.context_ttl))
    }
}

pub(crate) async fn run_discollama(config: DiscollamaConfig) -> Result<()> {
    let store = config.build_context_store()?;
    let backend =
        OllamaClient::new(config.ollama.clone()).context("failed to create ollama client")?;
    tracing::info!(
        model = %config.bridge.turn.model,
        ollama = %config.ollama.base_url,
        "starting discollama"
    );
    run_discord_bridge(config.bridge, Arc::new(backend), store).await
}
