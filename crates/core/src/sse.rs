//! Server-sent-event decoding for the streamed chat endpoint.
//!
//! [`SseDecoder`] is a push-based state machine: feed it byte chunks as they
//! arrive and it returns the chat events contained in every complete
//! blank-line-delimited block. [`ChatEventStream`] drives a decoder from any
//! byte stream and owns that stream until it is exhausted, cancelled or dropped.

use crate::contract::chat::ChatStreamEvent;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    // Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    done: bool,
}

enum Block {
    Event(ChatStreamEvent),
    Done(Option<ChatStreamEvent>),
    Skip,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a `[DONE]` marker or a `done: true` payload has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ChatStreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.decode_utf8(chunk);
        self.normalize_newlines(false);
        self.drain_blocks()
    }

    /// Flushes whatever is left once the underlying stream has ended.
    pub fn finish(&mut self) -> Vec<ChatStreamEvent> {
        if self.done {
            return Vec::new();
        }
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&rest));
        }
        self.normalize_newlines(true);

        let mut events = self.drain_blocks();
        let tail = std::mem::take(&mut self.buffer);
        if !self.done && !tail.trim().is_empty() {
            self.apply(parse_block(&tail), &mut events);
        }
        events
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(s) => {
                    self.buffer.push_str(s);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    let valid = std::str::from_utf8(&self.pending[start..valid_end]).unwrap_or_default();
                    self.buffer.push_str(valid);
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
    }

    fn normalize_newlines(&mut self, finishing: bool) {
        if !self.buffer.contains('\r') {
            return;
        }
        // A trailing CR may be the first half of a CRLF split across reads.
        let hold_cr = !finishing && self.buffer.ends_with('\r');
        let body = if hold_cr {
            &self.buffer[..self.buffer.len() - 1]
        } else {
            &self.buffer[..]
        };
        let mut out = body.replace("\r\n", "\n").replace('\r', "\n");
        if hold_cr {
            out.push('\r');
        }
        self.buffer = out;
    }

    fn drain_blocks(&mut self) -> Vec<ChatStreamEvent> {
        let mut events = Vec::new();
        while !self.done {
            let Some(idx) = self.buffer.find("\n\n") else {
                break;
            };
            let block: String = self.buffer.drain(..idx + 2).collect();
            self.apply(parse_block(&block[..idx]), &mut events);
        }
        if self.done {
            self.buffer.clear();
            self.pending.clear();
        }
        events
    }

    fn apply(&mut self, block: Block, events: &mut Vec<ChatStreamEvent>) {
        match block {
            Block::Event(event) => events.push(event),
            Block::Done(event) => {
                events.extend(event);
                self.done = true;
            }
            Block::Skip => {}
        }
    }
}

fn parse_block(block: &str) -> Block {
    let Some(payload) = block
        .lines()
        .filter(|line| !line.starts_with(':'))
        .find_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest).trim_end())
    else {
        return Block::Skip;
    };

    if payload == DONE_MARKER {
        return Block::Done(None);
    }

    let map = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(payload = %other, "skipping non-object SSE payload");
            return Block::Skip;
        }
        Err(err) => {
            tracing::warn!(error = %err, payload_len = payload.len(), "skipping malformed SSE payload");
            return Block::Skip;
        }
    };

    // Heartbeat.
    if map.is_empty() {
        return Block::Skip;
    }

    let done = map.get("done").and_then(Value::as_bool) == Some(true);
    let event = event_from_payload(&map, done);
    match (event, done) {
        (event, true) => Block::Done(event),
        (Some(event), false) => Block::Event(event),
        (None, false) => Block::Skip,
    }
}

fn str_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn event_from_payload(map: &Map<String, Value>, done: bool) -> Option<ChatStreamEvent> {
    let kind = map.get("type").and_then(Value::as_str);
    match kind {
        Some("token") => str_field(map, &["content", "token"]).map(ChatStreamEvent::Token),
        Some("tool_call") => Some(ChatStreamEvent::ToolCall {
            tool: str_field(map, &["tool", "name"]).unwrap_or_else(|| "unknown".to_string()),
            args: map.get("args").cloned().unwrap_or(Value::Null),
        }),
        Some("message") | Some("final") => Some(final_message(map)),
        Some("error") => Some(ChatStreamEvent::Error(
            str_field(map, &["message", "error"]).unwrap_or_else(|| "stream error".to_string()),
        )),
        Some(other) => {
            tracing::debug!(event_type = other, "ignoring unknown SSE event type");
            None
        }
        None if map.contains_key("token") => str_field(map, &["token"]).map(ChatStreamEvent::Token),
        None if done && map.contains_key("content") => Some(final_message(map)),
        None => None,
    }
}

fn final_message(map: &Map<String, Value>) -> ChatStreamEvent {
    let tools_used = map
        .get("tools_used")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    ChatStreamEvent::Message {
        content: str_field(map, &["content", "response"]).unwrap_or_default(),
        tools_used,
        confidence: map.get("confidence").and_then(Value::as_f64),
    }
}

/// Chat events decoded from a byte stream.
///
/// The source is dropped as soon as the stream is done, ends, fails or is
/// cancelled; dropping the `ChatEventStream` early drops it as well.
pub struct ChatEventStream<S> {
    source: Option<S>,
    decoder: SseDecoder,
    ready: VecDeque<ChatStreamEvent>,
    cancel: CancellationToken,
}

enum Step<T> {
    Cancelled,
    Item(Option<T>),
}

impl<S, B, E> ChatEventStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    pub fn new(source: S, cancel: CancellationToken) -> Self {
        Self {
            source: Some(source),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            cancel,
        }
    }

    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }

    /// Next event in arrival order; `None` once the stream is over.
    /// Transport errors from the source are returned unchanged and end the stream.
    pub async fn next_event(&mut self) -> Option<Result<ChatStreamEvent, E>> {
        loop {
            if self.cancel.is_cancelled() {
                self.ready.clear();
                self.release("cancelled");
                return None;
            }
            if let Some(event) = self.ready.pop_front() {
                return Some(Ok(event));
            }
            let source = self.source.as_mut()?;

            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                item = source.next() => Step::Item(item),
            };

            match step {
                Step::Cancelled => continue,
                Step::Item(Some(Ok(chunk))) => {
                    self.ready.extend(self.decoder.feed(chunk.as_ref()));
                    if self.decoder.is_done() {
                        self.release("done");
                    }
                }
                Step::Item(Some(Err(err))) => {
                    self.release("transport error");
                    return Some(Err(err));
                }
                Step::Item(None) => {
                    self.ready.extend(self.decoder.finish());
                    self.release("end of stream");
                }
            }
        }
    }

    fn release(&mut self, reason: &'static str) {
        if self.source.take().is_some() {
            tracing::debug!(reason, "chat stream released");
        }
    }
}
