//! Re-batches token-level backend fragments into timed [`Chunk`]s.
//!
//! Forwarding every token to the chat surface would burn through its edit
//! budget, so fragments are buffered and released either when the backend
//! completes or once `interval` has elapsed since the previous release,
//! whichever happens first. Each chunk carries only the text accumulated
//! since the previous chunk.

use std::{pin::Pin, time::Duration};

use futures_util::{Stream, StreamExt};
use tokio::time::Instant;

use crate::{Chunk, FragmentStream, GenerationError};

pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_secs(1);

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, GenerationError>> + Send>>;

/// Wraps a raw fragment stream into a stream of batched chunks.
///
/// The stream ends right after [`Chunk::Final`]. If the backend stream ends
/// without signalling completion, any buffered text is released as a partial
/// chunk and the stream then yields [`GenerationError::IncompleteStream`].
pub fn batch_fragments(fragments: FragmentStream, interval: Duration) -> ChunkStream {
    Box::pin(chunk_stream(fragments, interval))
}

fn chunk_stream(
    mut fragments: FragmentStream,
    interval: Duration,
) -> impl Stream<Item = Result<Chunk, GenerationError>> + Send {
    async_stream::try_stream! {
        let mut pending = String::new();
        let mut last_release = Instant::now();

        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            pending.push_str(&fragment.response);

            if fragment.done {
                yield Chunk::Final {
                    text: std::mem::take(&mut pending),
                    context: fragment.context.unwrap_or_default(),
                };
                return;
            }

            if last_release.elapsed() >= interval {
                yield Chunk::Partial(std::mem::take(&mut pending));
                last_release = Instant::now();
            }
        }

        if !pending.is_empty() {
            yield Chunk::Partial(std::mem::take(&mut pending));
        }
        Err::<(), GenerationError>(GenerationError::IncompleteStream)?;
    }
}
