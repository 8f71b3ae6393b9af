//! Upstream streaming chunks → Anthropic event-named SSE frames.
//!
//! The state machine keeps at most one content block open at a time
//! (`text`, `thinking` or `tool_use`) and guarantees that every
//! `content_block_start` is paired with a `content_block_stop` at the
//! same index, with indices contiguous from zero.

use bytes::Bytes;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use agwrap_common::json;

use super::map_stop_reason;
use crate::openai::stream::synthetic_call_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    None,
    Text,
    Thinking,
    ToolUse,
}

/// Per-stream conversion state for the Anthropic dialect.
#[derive(Debug)]
pub struct ClaudeStreamState {
    model: String,
    message_started: bool,
    block: BlockKind,
    block_index: u32,
    finish_reason: String,
    has_finish_reason: bool,
    has_usage: bool,
    prompt_tokens: i64,
    candidates_tokens: i64,
    thoughts_tokens: i64,
    total_tokens: i64,
    has_tool_use: bool,
    has_content: bool,
    has_sent_final: bool,
    has_sent_stop: bool,
}

impl ClaudeStreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message_started: false,
            block: BlockKind::None,
            block_index: 0,
            finish_reason: String::new(),
            has_finish_reason: false,
            has_usage: false,
            prompt_tokens: 0,
            candidates_tokens: 0,
            thoughts_tokens: 0,
            total_tokens: 0,
            has_tool_use: false,
            has_content: false,
            has_sent_final: false,
            has_sent_stop: false,
        }
    }

    /// Converts one upstream chunk into Anthropic SSE frames.
    pub fn push_chunk(&mut self, raw: &[u8]) -> Vec<Bytes> {
        if raw == b"[DONE]" {
            return Vec::new();
        }
        let Ok(parsed) = serde_json::from_slice::<Value>(raw) else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        self.ensure_message_start(&parsed, &mut frames);

        let finish_on_chunk = json::exists(&parsed, "response.candidates.0.finishReason");

        if let Some(parts) = json::get(&parsed, "response.candidates.0.content.parts")
            .and_then(Value::as_array)
            .cloned()
        {
            for part in &parts {
                self.apply_part(part, finish_on_chunk, &mut frames);
            }
        }

        if let Some(reason) = json::get_str(&parsed, "response.candidates.0.finishReason") {
            self.has_finish_reason = true;
            self.finish_reason = reason.to_string();
        }

        if let Some(usage) = json::get(&parsed, "response.usageMetadata") {
            self.has_usage = true;
            self.prompt_tokens = json::get_i64(usage, "promptTokenCount").unwrap_or(0);
            self.candidates_tokens = json::get_i64(usage, "candidatesTokenCount").unwrap_or(0);
            self.thoughts_tokens = json::get_i64(usage, "thoughtsTokenCount").unwrap_or(0);
            self.total_tokens = json::get_i64(usage, "totalTokenCount").unwrap_or(0);
            if self.candidates_tokens == 0 && self.total_tokens > 0 {
                self.candidates_tokens =
                    (self.total_tokens - self.prompt_tokens - self.thoughts_tokens).max(0);
            }
        }

        if self.has_usage && self.has_finish_reason {
            self.append_final_events(&mut frames);
        }

        frames
    }

    /// Closes the message. Emits the deferred final events when the
    /// upstream never delivered a terminal chunk, then `message_stop`.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        if !self.message_started || self.has_sent_stop {
            return frames;
        }
        if self.has_content {
            self.append_final_events(&mut frames);
        }
        frames.push(event_frame("message_stop", &json!({"type": "message_stop"})));
        self.has_sent_stop = true;
        frames
    }

    fn ensure_message_start(&mut self, parsed: &Value, frames: &mut Vec<Bytes>) {
        if self.message_started {
            return;
        }
        self.message_started = true;

        if let Some(model) = json::get_str(parsed, "response.modelVersion") {
            self.model = model.to_string();
        }
        let id = json::get_str(parsed, "response.responseId")
            .map(str::to_string)
            .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple()));

        frames.push(event_frame(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                },
            }),
        ));
    }

    fn apply_part(&mut self, part: &Value, finish_on_chunk: bool, frames: &mut Vec<Bytes>) {
        if let Some(text) = json::get_str(part, "text") {
            if json::get_bool(part, "thought").unwrap_or(false) {
                let signature = json::get_str(part, "thoughtSignature").unwrap_or_default();
                if !signature.is_empty() {
                    self.ensure_block(BlockKind::Thinking, frames);
                    frames.push(event_frame(
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "signature_delta", "signature": signature},
                        }),
                    ));
                    self.has_content = true;
                } else {
                    self.ensure_block(BlockKind::Thinking, frames);
                    frames.push(event_frame(
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "thinking_delta", "thinking": text},
                        }),
                    ));
                    self.has_content = true;
                }
                return;
            }

            // Terminal chunks may repeat an empty text part; opening a
            // block for it would produce an empty assistant message.
            if text.is_empty() && finish_on_chunk {
                return;
            }
            if self.block != BlockKind::Text {
                self.close_block(frames);
                if text.is_empty() {
                    return;
                }
                self.open_block(BlockKind::Text, frames);
            }
            frames.push(event_frame(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {"type": "text_delta", "text": text},
                }),
            ));
            self.has_content = true;
            return;
        }

        if let Some(call) = part.get("functionCall") {
            self.has_tool_use = true;
            self.close_block(frames);

            let name = json::get_str(call, "name").unwrap_or_default();
            frames.push(event_frame(
                "content_block_start",
                &json!({
                    "type": "content_block_start",
                    "index": self.block_index,
                    "content_block": {
                        "type": "tool_use",
                        "id": synthetic_call_id(name),
                        "name": name,
                        "input": {},
                    },
                }),
            ));
            if let Some(args) = call.get("args") {
                frames.push(event_frame(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": self.block_index,
                        "delta": {"type": "input_json_delta", "partial_json": args.to_string()},
                    }),
                ));
            }
            self.block = BlockKind::ToolUse;
            self.has_content = true;
            return;
        }

        // The Anthropic dialect has no image block; dropping the part is
        // the only option.
        if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
            let mime = json::get_str(inline, "mimeType")
                .or_else(|| json::get_str(inline, "mime_type"))
                .unwrap_or("unknown");
            warn!(mime, "dropping inline image part on the messages surface");
        }
    }

    /// Makes `kind` the open block, closing whatever was open before.
    fn ensure_block(&mut self, kind: BlockKind, frames: &mut Vec<Bytes>) {
        if self.block == kind {
            return;
        }
        self.close_block(frames);
        self.open_block(kind, frames);
    }

    fn open_block(&mut self, kind: BlockKind, frames: &mut Vec<Bytes>) {
        let content_block = match kind {
            BlockKind::Text => json!({"type": "text", "text": ""}),
            BlockKind::Thinking => json!({"type": "thinking", "thinking": ""}),
            // tool_use blocks are opened inline where the call id is known.
            BlockKind::ToolUse | BlockKind::None => return,
        };
        frames.push(event_frame(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block,
            }),
        ));
        self.block = kind;
    }

    fn close_block(&mut self, frames: &mut Vec<Bytes>) {
        if self.block == BlockKind::None {
            return;
        }
        frames.push(event_frame(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": self.block_index}),
        ));
        self.block_index += 1;
        self.block = BlockKind::None;
    }

    fn append_final_events(&mut self, frames: &mut Vec<Bytes>) {
        if self.has_sent_final || !self.has_content {
            return;
        }
        self.close_block(frames);

        let mut output_tokens = self.candidates_tokens + self.thoughts_tokens;
        if output_tokens == 0 && self.total_tokens > 0 {
            output_tokens = (self.total_tokens - self.prompt_tokens).max(0);
        }

        frames.push(event_frame(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": map_stop_reason(self.has_tool_use, &self.finish_reason),
                    "stop_sequence": null,
                },
                "usage": {
                    "input_tokens": self.prompt_tokens,
                    "output_tokens": output_tokens,
                },
            }),
        ));
        self.has_sent_final = true;
    }
}

fn event_frame(event: &str, data: &Value) -> Bytes {
    let payload = data.to_string();
    let mut out = Vec::with_capacity(payload.len() + event.len() + 16);
    out.extend_from_slice(b"event: ");
    out.extend_from_slice(event.as_bytes());
    out.extend_from_slice(b"\ndata: ");
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(b"\n\n");
    Bytes::from(out)
}
