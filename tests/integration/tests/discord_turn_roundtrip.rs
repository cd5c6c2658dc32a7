use std::{sync::Arc, time::Duration};

use discollama_ai::{ContextBlob, OllamaClient, OllamaConfig};
use discollama_discord_runtime::{
    BridgeRuntime, ChannelKind, ChatSurface, DiscordApiClient, DiscordApiConfig, InboundMessage,
    ReplyReference, SurfaceEvent, TurnOrchestrator, TurnSettings,
};
use discollama_state::{ContextStore, ConversationAnchor, MemoryStateBackend, DEFAULT_CONTEXT_TTL};
use httpmock::prelude::*;
use serde_json::json;
use tokio::sync::mpsc;

const BOT_USER_ID: &str = "42";

fn discord_client(server: &MockServer) -> Arc<dyn ChatSurface> {
    Arc::new(
        DiscordApiClient::new(DiscordApiConfig {
            api_base: server.base_url(),
            bot_token: "discord-token".to_string(),
            request_timeout_ms: 2_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        })
        .expect("discord client"),
    )
}

fn ollama_client(server: &MockServer) -> Arc<OllamaClient> {
    Arc::new(
        OllamaClient::new(OllamaConfig {
            base_url: server.base_url(),
            connect_timeout_ms: 2_000,
            max_retries: 0,
        })
        .expect("ollama client"),
    )
}

fn settings() -> Arc<TurnSettings> {
    Arc::new(TurnSettings {
        chunk_interval: Duration::from_millis(200),
        ..TurnSettings::default()
    })
}

fn memory_store() -> ContextStore {
    ContextStore::new(Arc::new(MemoryStateBackend::new()), DEFAULT_CONTEXT_TTL)
}

fn mention(message_id: &str, channel_id: &str, kind: ChannelKind, text: &str) -> InboundMessage {
    InboundMessage {
        message_id: message_id.to_string(),
        channel_id: channel_id.to_string(),
        channel_kind: kind,
        author_id: "user-1".to_string(),
        content: format!("<@{BOT_USER_ID}> {text}"),
        reply_to: None,
        mentions_self: true,
    }
}

fn mock_indicator_routes(server: &MockServer, channel_id: &str, message_id: &str) {
    let reaction_path =
        format!("/channels/{channel_id}/messages/{message_id}/reactions/%F0%9F%A4%94/@me");
    let add_path = reaction_path.clone();
    server.mock(move |when, then| {
        when.method(PUT).path(add_path);
        then.status(204);
    });
    server.mock(move |when, then| {
        when.method(DELETE).path(reaction_path);
        then.status(204);
    });
    let typing_path = format!("/channels/{channel_id}/typing");
    server.mock(move |when, then| {
        when.method(POST).path(typing_path);
        then.status(204);
    });
}

fn single_line_generation(text: &str, context: &[i64]) -> String {
    format!(
        "{}\n",
        json!({"model": "llama2", "response": text, "done": true, "context": context})
    )
}

#[tokio::test]
async fn integration_follow_up_in_thread_resumes_stored_context() {
    let discord = MockServer::start();
    let ollama = MockServer::start();
    let store = memory_store();

    let thread = discord.mock(|when, then| {
        when.method(POST)
            .path("/channels/c1/messages/m1/threads")
            .json_body(json!({"name": "Discollama Says", "auto_archive_duration": 60}));
        then.status(201).json_body(json!({"id": "t1", "type": 11}));
    });
    let first_reply = discord.mock(|when, then| {
        when.method(POST)
            .path("/channels/t1/messages")
            .json_body_includes(json!({"content": "Rayleigh scattering."}).to_string());
        then.status(200)
            .json_body(json!({"id": "r1", "channel_id": "t1", "content": "Rayleigh scattering."}));
    });
    let second_reply = discord.mock(|when, then| {
        when.method(POST)
            .path("/channels/t1/messages")
            .json_body_includes(json!({"content": "Longer paths redden it."}).to_string());
        then.status(200).json_body(
            json!({"id": "r2", "channel_id": "t1", "content": "Longer paths redden it."}),
        );
    });
    mock_indicator_routes(&discord, "c1", "m1");
    mock_indicator_routes(&discord, "t1", "m2");

    let first_generation = ollama.mock(|when, then| {
        when.method(POST).path("/api/generate").json_body_includes(
            json!({"model": "llama2", "prompt": "why is the sky blue?", "context": []})
                .to_string(),
        );
        then.status(200)
            .header("content-type", "application/x-ndjson")
            .body(single_line_generation("Rayleigh scattering.", &[1, 2, 3]));
    });
    let second_generation = ollama.mock(|when, then| {
        when.method(POST).path("/api/generate").json_body_includes(
            json!({"model": "llama2", "prompt": "and at sunset?", "context": [1, 2, 3]})
                .to_string(),
        );
        then.status(200)
            .header("content-type", "application/x-ndjson")
            .body(single_line_generation("Longer paths redden it.", &[1, 2, 3, 4, 5]));
    });

    let surface = discord_client(&discord);
    let backend = ollama_client(&ollama);

    let mut first = TurnOrchestrator::new(surface.clone(), backend.clone(), store.clone(), settings());
    let outcome = first
        .run(
            &mention("m1", "c1", ChannelKind::GuildText, "why is the sky blue?"),
            BOT_USER_ID,
        )
        .await
        .expect("first turn");
    assert_eq!(outcome.delivery_channel_id, "t1");
    assert_eq!(outcome.messages_sent, 1);

    let mut second = TurnOrchestrator::new(surface, backend, store.clone(), settings());
    let outcome = second
        .run(
            &mention("m2", "t1", ChannelKind::Thread, "and at sunset?"),
            BOT_USER_ID,
        )
        .await
        .expect("second turn");
    assert_eq!(outcome.delivery_channel_id, "t1");

    thread.assert_hits(1);
    first_reply.assert();
    second_reply.assert();
    first_generation.assert();
    second_generation.assert();

    assert_eq!(
        store
            .load(&ConversationAnchor::channel("t1"))
            .await
            .expect("thread context"),
        ContextBlob::new(vec![1, 2, 3, 4, 5])
    );
    assert_eq!(
        store
            .load(&ConversationAnchor::message("m1"))
            .await
            .expect("first message context"),
        ContextBlob::new(vec![1, 2, 3])
    );
    assert!(store
        .load(&ConversationAnchor::channel("c1"))
        .await
        .expect("origin channel")
        .is_empty());
}

#[tokio::test]
async fn integration_reply_without_stored_context_inlines_fetched_text() {
    let discord = MockServer::start();
    let ollama = MockServer::start();
    let store = memory_store();

    let fetch = discord.mock(|when, then| {
        when.method(GET).path("/channels/d1/messages/m0");
        then.status(200)
            .json_body(json!({"id": "m0", "channel_id": "d1", "content": "the sky is blue"}));
    });
    let reply = discord.mock(|when, then| {
        when.method(POST).path("/channels/d1/messages");
        then.status(200)
            .json_body(json!({"id": "r1", "channel_id": "d1", "content": "Indeed."}));
    });
    mock_indicator_routes(&discord, "d1", "m5");

    let expected_prompt = "is that right?\nUse this to answer the question if it is relevant, otherwise ignore it:\nthe sky is blue";
    let generation = ollama.mock(|when, then| {
        when.method(POST).path("/api/generate").json_body_includes(
            json!({"prompt": expected_prompt, "context": []}).to_string(),
        );
        then.status(200)
            .header("content-type", "application/x-ndjson")
            .body(single_line_generation("Indeed.", &[9]));
    });

    let mut message = mention("m5", "d1", ChannelKind::DirectMessage, "is that right?");
    message.reply_to = Some(ReplyReference {
        message_id: "m0".to_string(),
        content: None,
    });

    let mut orchestrator = TurnOrchestrator::new(
        discord_client(&discord),
        ollama_client(&ollama),
        store.clone(),
        settings(),
    );
    let outcome = orchestrator
        .run(&message, BOT_USER_ID)
        .await
        .expect("reply turn");

    assert_eq!(outcome.delivery_channel_id, "d1");
    fetch.assert();
    reply.assert();
    generation.assert();
    assert_eq!(
        store
            .load(&ConversationAnchor::message("m5"))
            .await
            .expect("reply context"),
        ContextBlob::new(vec![9])
    );
}

#[tokio::test]
async fn integration_bridge_runtime_answers_only_qualifying_mentions() {
    let discord = MockServer::start();
    let ollama = MockServer::start();

    let reply = discord.mock(|when, then| {
        when.method(POST).path("/channels/d1/messages");
        then.status(200)
            .json_body(json!({"id": "r1", "channel_id": "d1", "content": "Hello there."}));
    });
    mock_indicator_routes(&discord, "d1", "m3");
    let generation = ollama.mock(|when, then| {
        when.method(POST)
            .path("/api/generate")
            .json_body_includes(json!({"prompt": "Hi!"}).to_string());
        then.status(200)
            .header("content-type", "application/x-ndjson")
            .body(single_line_generation("Hello there.", &[7, 8]));
    });

    let mut runtime = BridgeRuntime::new(
        discord_client(&discord),
        ollama_client(&ollama),
        memory_store(),
        TurnSettings::default(),
    );
    let (events_tx, events_rx) = mpsc::channel(8);

    let mut own = mention("m1", "d1", ChannelKind::DirectMessage, "echo");
    own.author_id = BOT_USER_ID.to_string();
    let mut unmentioned = mention("m2", "d1", ChannelKind::DirectMessage, "hello");
    unmentioned.mentions_self = false;
    let bare = mention("m3", "d1", ChannelKind::DirectMessage, "");

    for event in [
        SurfaceEvent::Ready {
            user_id: BOT_USER_ID.to_string(),
            application_id: "app-1".to_string(),
        },
        SurfaceEvent::MessageReceived(own),
        SurfaceEvent::MessageReceived(unmentioned),
        SurfaceEvent::MessageReceived(bare),
    ] {
        events_tx.send(event).await.expect("queue event");
    }
    drop(events_tx);

    tokio::time::timeout(Duration::from_secs(10), runtime.run(events_rx))
        .await
        .expect("runtime drains")
        .expect("runtime result");

    assert_eq!(runtime.bot_user_id(), Some(BOT_USER_ID));
    assert_eq!(runtime.in_flight_turns(), 0);
    reply.assert_hits(1);
    generation.assert_hits(1);
}
