//! Discord surface for the discollama bridge.
//!
//! Exposes the chat-surface seam, the Discord REST and gateway transports,
//! and the per-turn pipeline that streams generated text back into Discord.
mod discord_runtime;

pub use discord_runtime::*;
