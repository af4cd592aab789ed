//! Server-Sent-Events reader
//!
//! Normalizes a raw byte stream into `(event-type, data)` pairs. This layer
//! knows nothing about any backend's JSON payloads; interpreting the pairs
//! is the adapter's job.

use crate::providers::error::{ProviderError, ProviderResult};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the last `event:` field, empty if none was sent
    pub event_type: String,
    /// All `data:` lines joined with `\n`
    pub data: String,
}

/// Incremental SSE decoder over a chunked byte stream.
///
/// Lines are processed as they complete, independent of how the transport
/// split the bytes into chunks. A blank line terminates the pending event;
/// end-of-stream flushes whatever is still accumulated.
pub struct SseReader<S> {
    stream: S,
    buf: BytesMut,
    eof: bool,
}

impl<S> SseReader<S>
where
    S: Stream<Item = ProviderResult<Bytes>> + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            eof: false,
        }
    }

    /// Read the next event, or `None` at a clean end of stream.
    pub async fn next_event(&mut self) -> ProviderResult<Option<SseEvent>> {
        let mut event_type: Option<String> = None;
        let mut data_lines: Vec<String> = Vec::new();

        loop {
            let Some(line) = self.next_line().await? else {
                // End of stream: flush pending content, mirroring the
                // blank-line rule.
                if event_type.is_some() || !data_lines.is_empty() {
                    return Ok(Some(assemble(event_type, data_lines)));
                }
                return Ok(None);
            };

            if line.is_empty() {
                if event_type.is_some() || !data_lines.is_empty() {
                    return Ok(Some(assemble(event_type, data_lines)));
                }
                continue;
            }

            // "field:value". A leading colon makes the field name empty,
            // which is the comment form; unknown fields (id, retry, ...)
            // fall through the same arm.
            let (field, value) = match line.find(':') {
                Some(idx) => (&line[..idx], &line[idx + 1..]),
                None => (line.as_str(), ""),
            };
            let value = value.strip_prefix(' ').unwrap_or(value);

            match field {
                "event" => event_type = Some(value.to_string()),
                "data" => data_lines.push(value.to_string()),
                _ => {}
            }
        }
    }

    /// Pull the next complete line, pulling more chunks as needed.
    /// Returns `None` once the stream is exhausted and the buffer drained.
    async fn next_line(&mut self) -> ProviderResult<Option<String>> {
        loop {
            if let Some(idx) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(idx + 1);
                line.truncate(idx);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                return Ok(Some(line));
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(err)) => return Err(err),
                None => self.eof = true,
            }
        }
    }
}

fn assemble(event_type: Option<String>, data_lines: Vec<String>) -> SseEvent {
    SseEvent {
        event_type: event_type.unwrap_or_default(),
        data: data_lines.join("\n"),
    }
}

/// Adapt a reqwest body stream into the reader's input item type.
pub fn body_stream(
    provider: &'static str,
    stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = ProviderResult<Bytes>> + Send + Unpin + 'static {
    Box::pin(stream.map(move |chunk| chunk.map_err(|err| ProviderError::from_reqwest(provider, err))))
}
