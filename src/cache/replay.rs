//! Replay of a cached response as a synthetic stream.

use futures_util::stream;

use crate::types::{FinishReason, PartStream, StreamPart, Usage};

/// Split `text` into deltas of at most `chunk_size` characters followed by a
/// single finish event.
///
/// Empty text produces only the finish event. Splits fall on character
/// boundaries, never inside a UTF-8 sequence.
pub fn replay_stream(
    text: &str,
    chunk_size: usize,
    finish_reason: FinishReason,
    usage: Usage,
) -> PartStream {
    let mut parts: Vec<crate::Result<StreamPart>> = chunk_text(text, chunk_size.max(1))
        .into_iter()
        .map(|chunk| Ok(StreamPart::TextDelta(chunk)))
        .collect();
    parts.push(Ok(StreamPart::finish(finish_reason, usage)));
    Box::pin(stream::iter(parts))
}

fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect())
        .collect()
}
