use futures::stream::Stream;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use stagecraft_core::error::StagecraftError;

/// Incremental parser for `text/event-stream` bodies.
/// Events are separated by a blank line; only `event:` and `data:` lines matter.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    /// Bytes of a UTF-8 sequence split across chunks.
    partial: Vec<u8>,
}

/// A parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// OpenAI-style end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes. A multi-byte character split across chunks is
    /// held back until the rest of it arrives.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.partial.extend_from_slice(chunk);
        let mut text = String::new();
        loop {
            let err = match std::str::from_utf8(&self.partial) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.partial.clear();
                    break;
                }
                Err(err) => err,
            };
            let valid = err.valid_up_to();
            text.push_str(&String::from_utf8_lossy(&self.partial[..valid]));
            match err.error_len() {
                Some(bad) => {
                    text.push(char::REPLACEMENT_CHARACTER);
                    self.partial.drain(..valid + bad);
                }
                None => {
                    self.partial.drain(..valid);
                    break;
                }
            }
        }
        self.feed(&text)
    }

    /// Feed a chunk of text and drain every complete event.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();

            let mut event_type = None;
            let mut data_lines = Vec::new();
            for line in block.lines() {
                if line.starts_with(':') {
                    continue; // keep-alive comment
                }
                if let Some(val) = line.strip_prefix("event:") {
                    event_type = Some(val.trim_start().to_string());
                } else if let Some(val) = line.strip_prefix("data:") {
                    data_lines.push(val.strip_prefix(' ').unwrap_or(val).to_string());
                }
            }

            if !data_lines.is_empty() {
                events.push(SseEvent {
                    event_type,
                    data: data_lines.join("\n"),
                });
            }
        }

        events
    }
}

/// A stream of SSE events from raw bytes.
///
/// A body error is yielded once as `StagecraftError::LlmStream` and ends the
/// stream, so a broken connection never looks like a clean finish.
pub struct SseStream<S> {
    inner: S,
    parser: SseParser,
    pending: std::collections::VecDeque<SseEvent>,
    failed: bool,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: Default::default(),
            failed: false,
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<SseEvent, StagecraftError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.failed {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.parser.feed_bytes(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(error = %e, "SSE body stream failed");
                    this.failed = true;
                    return Poll::Ready(Some(Err(StagecraftError::LlmStream(e.to_string()))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
