//! Generation backend surface for the discollama bridge.
//!
//! Hosts the backend-agnostic fragment/chunk types, the Ollama streaming
//! client and the adapter that re-batches token fragments into timed chunks.
mod ollama;
mod retry;
mod stream_adapter;
mod types;

pub use ollama::{decode_fragment_line, OllamaClient, OllamaConfig};
pub use retry::{
    is_retryable_http_error, next_backoff_ms, parse_retry_after_ms, retry_delay_ms,
    should_retry_status,
};
pub use stream_adapter::{batch_fragments, ChunkStream, DEFAULT_CHUNK_INTERVAL};
pub use types::{
    Chunk, ContextBlob, FragmentStream, GenerateFragment, GenerateRequest, GenerationBackend,
    GenerationError,
};
