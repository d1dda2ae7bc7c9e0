//! Server-sent events decoding.
//!
//! Network reads do not respect line or event boundaries, so bytes are
//! buffered until a full line arrives and `data:` lines are collected until
//! the blank line that ends an event.

use futures::{Stream, StreamExt};
use std::collections::VecDeque;

use crate::traits::{ChunkStream, ProviderError, StreamingChunk};

/// Sentinel some APIs send as the final `data:` payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the `data` payload of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.process_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Flush whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.process_line(line.trim_end_matches('\r'), &mut events);
        }
        self.process_line("", &mut events);
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
            }
            return;
        }

        // Comments (keep-alives) start with ':'; event/id/retry fields are not needed
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }
}

struct DecodeState<S, F> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamingChunk, ProviderError>>,
    parse: F,
    finished: bool,
}

impl<S, F> DecodeState<S, F>
where
    F: FnMut(&str) -> Result<Option<StreamingChunk>, ProviderError>,
{
    fn accept(&mut self, events: Vec<String>) {
        for data in events {
            if self.finished {
                return;
            }
            if data.trim() == DONE_SENTINEL {
                self.finished = true;
                return;
            }
            match (self.parse)(&data) {
                Ok(Some(chunk)) => self.pending.push_back(Ok(chunk)),
                Ok(None) => {}
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                }
            }
        }
    }
}

/// Turn an SSE byte stream into chunks using a per-event `parse` function.
///
/// `parse` returns `Ok(None)` for events that carry nothing useful. The
/// stream ends after `[DONE]`, after the first error, or when the bytes run out.
pub fn decode_chunks<S, B, F>(bytes: S, parse: F) -> ChunkStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    F: FnMut(&str) -> Result<Option<StreamingChunk>, ProviderError> + Send + 'static,
{
    let state = DecodeState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        parse,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.accept(events);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(ProviderError::Network(e)));
                    state.finished = true;
                }
                None => {
                    let events = state.decoder.finish();
                    state.accept(events);
                    state.finished = true;
                }
            }
        }
    }))
}
