use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
/// Opaque backend state reported at the end of a turn.
///
/// The tokens are handed back verbatim as the next turn's prior context; the
/// bridge never inspects or merges them.
pub struct ContextBlob(Vec<i64>);

impl ContextBlob {
    pub fn new(tokens: Vec<i64>) -> Self {
        Self(tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn tokens(&self) -> &[i64] {
        &self.0
    }

    pub fn into_tokens(self) -> Vec<i64> {
        self.0
    }
}

impl From<Vec<i64>> for ContextBlob {
    fn from(tokens: Vec<i64>) -> Self {
        Self(tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `GenerateRequest` sent to a generation backend.
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub context: ContextBlob,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// One raw emission from the backend.
///
/// `response` fragments are appended in order; `context` is only attached to
/// the fragment that carries `done = true`.
pub struct GenerateFragment {
    pub response: String,
    pub done: bool,
    pub context: Option<ContextBlob>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A batched unit of generated text handed to the response accumulator.
pub enum Chunk {
    Partial(String),
    Final { text: String, context: ContextBlob },
}

impl Chunk {
    pub fn text(&self) -> &str {
        match self {
            Self::Partial(text) => text,
            Self::Final { text, .. } => text,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `GenerationError` values.
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("backend reported error: {0}")]
    Backend(String),
    #[error("generation stream ended before the backend signalled completion")]
    IncompleteStream,
}

pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<GenerateFragment, GenerationError>> + Send>>;

#[async_trait]
/// Trait contract for `GenerationBackend` behavior.
pub trait GenerationBackend: Send + Sync {
    /// Opens a streaming generation for `request`.
    ///
    /// Errors returned here happen before any fragment was produced; errors
    /// yielded by the stream happen mid-generation.
    async fn generate(&self, request: GenerateRequest) -> Result<FragmentStream, GenerationError>;
}
