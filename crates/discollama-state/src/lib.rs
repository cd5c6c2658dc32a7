//! Conversation context persistence for the discollama bridge.
//!
//! Maps conversation anchors (channels and messages) to the generation
//! backend's context tokens in an external key-value store with expiry.
mod backend;
mod context_store;
mod dapr;

pub use backend::{MemoryStateBackend, StateBackend, StateStoreError};
pub use context_store::{ContextStore, ConversationAnchor, DEFAULT_CONTEXT_TTL, STATE_KEY_PREFIX};
pub use dapr::{DaprStateBackend, DaprStateConfig};
