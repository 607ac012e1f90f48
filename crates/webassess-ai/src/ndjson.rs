//! Incremental decoding of newline-delimited JSON response bodies.
//!
//! Records are yielded as soon as their terminating newline arrives, so a
//! long-running stream is never buffered as a whole.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NdjsonError {
    #[error("stream transport error: {0}")]
    Transport(String),

    #[error("invalid record {line:?}: {message}")]
    Decode { line: String, message: String },
}

/// Longest line accepted before the stream is treated as corrupt.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

struct DecoderState<S> {
    inner: S,
    buffer: Vec<u8>,
    max_line: usize,
    exhausted: bool,
    failed: bool,
}

/// Decode a byte stream into typed records, one per non-blank line.
///
/// The stream ends after the first error.
pub fn decode_ndjson<S, E, T>(
    bytes: S,
) -> impl Stream<Item = Result<T, NdjsonError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    decode_ndjson_with_limit(bytes, MAX_LINE_BYTES)
}

/// Like [`decode_ndjson`], failing once a line grows past `max_line` bytes.
pub fn decode_ndjson_with_limit<S, E, T>(
    bytes: S,
    max_line: usize,
) -> impl Stream<Item = Result<T, NdjsonError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let state = DecoderState {
        inner: bytes,
        buffer: Vec::new(),
        max_line,
        exhausted: false,
        failed: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.failed {
            return None;
        }

        loop {
            let newline = state.buffer.iter().position(|b| *b == b'\n');
            if newline.unwrap_or(state.buffer.len()) > state.max_line {
                let error = oversized_line(&state.buffer, state.max_line);
                state.failed = true;
                return Some((Err(error), state));
            }

            if let Some(pos) = newline {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                if is_blank(&line) {
                    continue;
                }
                let record = parse_line(&line);
                state.failed = record.is_err();
                return Some((record, state));
            }

            if state.exhausted {
                if is_blank(&state.buffer) {
                    return None;
                }
                // Final record without a trailing newline.
                let line = std::mem::take(&mut state.buffer);
                let record = parse_line(&line);
                state.failed = record.is_err();
                return Some((record, state));
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.failed = true;
                    return Some((Err(NdjsonError::Transport(e.to_string())), state));
                }
                None => state.exhausted = true,
            }
        }
    })
}

fn oversized_line(buffer: &[u8], max_line: usize) -> NdjsonError {
    let preview = &buffer[..buffer.len().min(64)];
    NdjsonError::Decode {
        line: String::from_utf8_lossy(preview).into_owned(),
        message: format!("line exceeds {} bytes", max_line),
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Result<T, NdjsonError> {
    serde_json::from_slice(line).map_err(|e| NdjsonError::Decode {
        line: String::from_utf8_lossy(line).trim().to_string(),
        message: e.to_string(),
    })
}
