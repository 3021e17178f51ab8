//! OpenAI SSE stream → Anthropic SSE stream
//!
//! The upstream emits `data: <json>` chunk lines terminated by
//! `data: [DONE]`. The translator re-frames them as Anthropic Messages
//! events: one `message_start`, text deltas inside an open text block,
//! tool calls accumulated until the end of stream, then `message_delta`
//! with the mapped stop reason and `message_stop`.
//!
//! Byte chunks may split lines anywhere; the stream wrapper buffers the
//! partial tail and replays it when the rest arrives. Unparseable data
//! lines are skipped. Chunks carrying only `usage` are recorded for the
//! final `message_delta`.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, pin_mut};
use serde_json::{Value, json};
use tracing::trace;

use crate::map_finish_reason;

#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Incremental OpenAI→Anthropic SSE state machine.
///
/// Feed decoded lines through `push_line`; each call returns zero or more
/// fully framed Anthropic SSE events. Call `finish` when the upstream ends
/// without a `[DONE]` marker.
#[derive(Debug, Default)]
pub struct SseTranslator {
    started: bool,
    text_open: bool,
    block_index: usize,
    tool_calls: BTreeMap<u64, ToolCallAccumulator>,
    finish_reason: Option<String>,
    output_tokens: u64,
    done: bool,
}

impl SseTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one decoded SSE line (without its trailing newline).
    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        let Some(payload) = line.trim_start().strip_prefix("data:") else {
            // event:/comment/blank lines carry nothing we translate
            return Vec::new();
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            return self.finish();
        }
        let Ok(chunk) = serde_json::from_str::<Value>(payload) else {
            trace!("skipping unparseable SSE chunk");
            return Vec::new();
        };
        self.push_chunk(&chunk)
    }

    /// Flush terminal events. Idempotent; a no-op when no chunk arrived.
    pub fn finish(&mut self) -> Vec<String> {
        if self.done || !self.started {
            self.done = true;
            return Vec::new();
        }
        self.done = true;

        let mut frames = Vec::new();
        if self.text_open {
            frames.push(frame(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": self.block_index}),
            ));
            self.block_index += 1;
            self.text_open = false;
        }

        for accumulator in std::mem::take(&mut self.tool_calls).into_values() {
            frames.push(frame(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": self.block_index,
                    "content_block": {
                        "type": "tool_use",
                        "id": accumulator.id.unwrap_or_default(),
                        "name": accumulator.name.unwrap_or_default(),
                        "input": {},
                    },
                }),
            ));
            frames.push(frame(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {
                        "type": "input_json_delta",
                        "partial_json": accumulator.arguments,
                    },
                }),
            ));
            frames.push(frame(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": self.block_index}),
            ));
            self.block_index += 1;
        }

        frames.push(frame(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": map_finish_reason(self.finish_reason.as_deref()),
                    "stop_sequence": Value::Null,
                },
                "usage": {"output_tokens": self.output_tokens},
            }),
        ));
        frames.push(frame("message_stop", json!({"type": "message_stop"})));
        frames
    }

    fn push_chunk(&mut self, chunk: &Value) -> Vec<String> {
        let mut frames = Vec::new();

        if !self.started {
            self.started = true;
            frames.push(frame(
                "message_start",
                json!({
                    "type": "message_start",
                    "message": {
                        "id": chunk.get("id").and_then(Value::as_str).unwrap_or("msg_stream"),
                        "type": "message",
                        "role": "assistant",
                        "model": chunk.get("model").and_then(Value::as_str).unwrap_or(""),
                        "content": [],
                        "stop_reason": Value::Null,
                        "stop_sequence": Value::Null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                }),
            ));
        }

        if let Some(tokens) = chunk
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(Value::as_u64)
        {
            self.output_tokens = tokens;
        }

        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            // usage-only chunk
            return frames;
        };

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }

        let Some(delta) = choice.get("delta") else {
            return frames;
        };

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                if !self.text_open {
                    self.text_open = true;
                    frames.push(frame(
                        "content_block_start",
                        json!({
                            "type": "content_block_start",
                            "index": self.block_index,
                            "content_block": {"type": "text", "text": ""},
                        }),
                    ));
                }
                frames.push(frame(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": self.block_index,
                        "delta": {"type": "text_delta", "text": text},
                    }),
                ));
            }
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            if self.text_open {
                frames.push(frame(
                    "content_block_stop",
                    json!({"type": "content_block_stop", "index": self.block_index}),
                ));
                self.block_index += 1;
                self.text_open = false;
            }
            for call in tool_calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let accumulator = self.tool_calls.entry(index).or_default();
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    accumulator.id.get_or_insert_with(|| id.to_string());
                }
                if let Some(name) = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                {
                    accumulator.name.get_or_insert_with(|| name.to_string());
                }
                if let Some(arguments) = call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                {
                    accumulator.arguments.push_str(arguments);
                }
            }
        }

        frames
    }
}

fn frame(name: &str, data: Value) -> String {
    format!("event: {name}\ndata: {data}\n\n")
}

/// Wrap an upstream OpenAI SSE byte stream into an Anthropic SSE byte
/// stream.
///
/// Upstream read errors pass through and terminate the stream; dropping the
/// returned stream drops the upstream body, cancelling the read.
pub fn translate_sse<S, E>(upstream: S) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    async_stream::stream! {
        let mut translator = SseTranslator::new();
        let mut buffer = String::new();
        pin_mut!(upstream);

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(newline) = buffer.find('\n') {
                        let line: String = buffer.drain(..=newline).collect();
                        for event in translator.push_line(line.trim_end_matches(['\n', '\r'])) {
                            yield Ok(Bytes::from(event));
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        // Residual partial line, then terminal events if the upstream ended
        // without [DONE]
        if !buffer.trim().is_empty() {
            let residual = std::mem::take(&mut buffer);
            for event in translator.push_line(residual.trim_end_matches('\r')) {
                yield Ok(Bytes::from(event));
            }
        }
        for event in translator.finish() {
            yield Ok(Bytes::from(event));
        }
    }
}
