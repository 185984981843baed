//! SSE (Server-Sent Events) framing
//!
//! Turns raw byte chunks from the creation endpoint into complete `data:`
//! payloads, one per event, in arrival order.

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Incremental SSE decoder that handles partial lines across chunks
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of a line not yet terminated by `\n`
    partial_line: Vec<u8>,
    /// `data:` lines of the event being assembled
    data_lines: Vec<String>,
    /// Events dispatched so far
    event_count: usize,
    /// Bytes received counter
    bytes_received: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every event payload it completes
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes_received += chunk.len();
        debug!(
            "SSE chunk received: {} bytes (total: {} bytes)",
            chunk.len(),
            self.bytes_received
        );

        self.partial_line.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.partial_line.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.partial_line.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(payload) = self.process_line(&line) {
                events.push(payload);
            }
        }

        events
    }

    /// Close the decoder once the transport has reached EOF.
    ///
    /// An event without its terminating blank line is incomplete and is
    /// discarded, so a cut connection never yields a half-received sentinel.
    pub fn finish(&mut self) {
        if !self.partial_line.is_empty() || !self.data_lines.is_empty() {
            warn!(
                "Discarding unterminated SSE event at EOF ({} data lines, {} partial bytes)",
                self.data_lines.len(),
                self.partial_line.len()
            );
        }
        self.partial_line.clear();
        self.data_lines.clear();
        info!(
            "SSE decoder finishing: {} events, {} bytes total",
            self.event_count, self.bytes_received
        );
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        // Blank line terminates the event
        if line.is_empty() {
            return self.dispatch();
        }

        // Comments (keep-alives)
        if line.starts_with(':') {
            return None;
        }

        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.data_lines.push(data.to_string());
        }
        // event:, id:, retry: carry nothing this protocol uses
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        self.event_count += 1;
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        debug!("SSE event #{}: {} chars", self.event_count, payload.len());
        Some(payload)
    }
}

/// Adapt a byte stream into a stream of SSE payload lines.
///
/// The stream ends when the transport closes; an unterminated trailing
/// event is dropped. A transport error is yielded once and then the stream ends.
pub fn sse_lines<S, E>(bytes: S) -> BoxStream<'static, Result<String, TransportError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<TransportError>,
{
    struct State<S> {
        inner: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        ready: VecDeque<String>,
        done: bool,
    }

    let state = State {
        inner: Box::pin(bytes),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push_chunk(&chunk);
                    state.ready.extend(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    state.decoder.finish();
                }
            }
        }
    })
    .boxed()
}
