//! Line-framed delta decoding for streamed chat completions.
//!
//! The body is a sequence of text lines. Lines starting with `data: ` carry
//! one JSON payload each; `[DONE]` is a terminator sentinel; everything else
//! is noise. A payload contributes its `choices[0].delta.content` text.

use futures::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::pin::Pin;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, Decoder};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::error::StreamError;
use crate::api::provider::ByteStream;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Lazy, finite sequence of text fragments. Not restartable.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Text delta carried by one line, if any.
pub fn delta_from_line(line: &str) -> Option<String> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    if data == DONE_SENTINEL {
        return None;
    }

    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(target: "decode::line", "Skipping unparseable payload: {} data: {}", e, data);
            return None;
        }
    };

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|text| !text.is_empty())
}

/// Decodes a response body into text deltas.
///
/// Lines are split on raw bytes, so partial lines and multibyte characters
/// are carried across chunk boundaries, and a trailing line without a newline
/// is flushed at end of body. Invalid UTF-8 is replaced, not fatal.
/// Cancellation is checked before and while waiting for every chunk.
pub fn text_deltas(mut body: ByteStream, token: CancellationToken) -> DeltaStream {
    Box::pin(async_stream::stream! {
        let mut codec = AnyDelimiterCodec::new(b"\n".to_vec(), Vec::new());
        let mut buffer = BytesMut::new();

        'read: loop {
            if token.is_cancelled() {
                yield Err(StreamError::Cancelled);
                break;
            }

            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    yield Err(StreamError::Cancelled);
                    break;
                }
                next = body.next() => next
            };

            let at_eof = match next {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    false
                }
                Some(Err(err)) => {
                    debug!(target: "decode::stream", "Body failed: {}", err);
                    yield Err(StreamError::from(err));
                    break;
                }
                None => true,
            };

            loop {
                let decoded = if at_eof {
                    codec.decode_eof(&mut buffer)
                } else {
                    codec.decode(&mut buffer)
                };
                match decoded {
                    Ok(Some(raw)) => {
                        let line = String::from_utf8_lossy(&raw);
                        if let Some(delta) = delta_from_line(line.trim_end_matches('\r')) {
                            yield Ok(delta);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(StreamError::Decode(err.to_string()));
                        break 'read;
                    }
                }
            }

            if at_eof {
                break;
            }
        }
    })
}
