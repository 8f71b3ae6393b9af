//! Upstream streaming chunks → OpenAI `chat.completion.chunk` frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use agwrap_common::json;

/// Process-wide suffix keeping synthetic tool-call ids unique across
/// concurrent streams.
static TOOL_CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-stream conversion state. A passive value: it owns no buffers or
/// channels and is driven chunk-by-chunk by the response path.
#[derive(Debug)]
pub struct OpenAiStreamState {
    model: String,
    response_id: String,
    created: i64,
    tool_call_index: u64,
    has_tool_call: bool,
    thinking_as_content: bool,
    done_sent: bool,
}

impl OpenAiStreamState {
    pub fn new(model: impl Into<String>, thinking_as_content: bool) -> Self {
        Self {
            model: model.into(),
            response_id: String::new(),
            created: 0,
            tool_call_index: 0,
            has_tool_call: false,
            thinking_as_content,
            done_sent: false,
        }
    }

    /// Converts one upstream chunk into zero or one SSE frames.
    pub fn push_chunk(&mut self, raw: &[u8]) -> Vec<Bytes> {
        if raw == b"[DONE]" {
            return Vec::new();
        }
        let Ok(parsed) = serde_json::from_slice::<Value>(raw) else {
            return Vec::new();
        };

        let mut chunk = json!({
            "id": "",
            "object": "chat.completion.chunk",
            "created": 0,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": {
                    "role": null,
                    "content": null,
                    "reasoning_content": null,
                    "tool_calls": null,
                },
                "finish_reason": null,
                "native_finish_reason": null,
            }],
        });

        if let Some(model) = json::get_str(&parsed, "response.modelVersion") {
            self.model = model.to_string();
            json::set(&mut chunk, "model", json!(model));
        }

        if let Some(create_time) = json::get_str(&parsed, "response.createTime")
            && let Ok(stamp) = OffsetDateTime::parse(create_time, &Rfc3339)
        {
            self.created = stamp.unix_timestamp();
        }
        json::set(&mut chunk, "created", json!(self.created));

        if let Some(id) = json::get_str(&parsed, "response.responseId") {
            self.response_id = id.to_string();
        }
        json::set(&mut chunk, "id", json!(self.response_id));

        if let Some(parts) = json::get(&parsed, "response.candidates.0.content.parts")
            .and_then(Value::as_array)
            .cloned()
        {
            for part in &parts {
                self.apply_part(&mut chunk, part);
            }
        }

        if let Some(reason) = json::get_str(&parsed, "response.candidates.0.finishReason") {
            let mapped = if self.has_tool_call {
                "tool_calls".to_string()
            } else {
                reason.to_ascii_lowercase()
            };
            json::set(&mut chunk, "choices.0.finish_reason", json!(mapped));
            json::set(&mut chunk, "choices.0.native_finish_reason", json!(mapped));
        }

        if let Some(usage) = json::get(&parsed, "response.usageMetadata") {
            apply_usage(&mut chunk, usage);
        }

        vec![frame(&chunk)]
    }

    /// Emits the stream terminator. Exactly one `data: [DONE]` per stream.
    pub fn finish(&mut self) -> Vec<Bytes> {
        if self.done_sent {
            return Vec::new();
        }
        self.done_sent = true;
        vec![Bytes::from_static(b"data: [DONE]\n\n")]
    }

    fn apply_part(&mut self, chunk: &mut Value, part: &Value) {
        let text = json::get_str(part, "text");
        let function_call = part.get("functionCall");
        let inline_data = part.get("inlineData").or_else(|| part.get("inline_data"));
        let signature = json::get_str(part, "thoughtSignature")
            .or_else(|| json::get_str(part, "thought_signature"))
            .unwrap_or_default();

        // Encrypted signature markers with no actual payload are skipped.
        if !signature.is_empty() && text.is_none() && function_call.is_none() && inline_data.is_none()
        {
            return;
        }

        if let Some(text) = text {
            let is_thought = json::get_bool(part, "thought").unwrap_or(false);
            let field = if is_thought && !self.thinking_as_content {
                "choices.0.delta.reasoning_content"
            } else {
                "choices.0.delta.content"
            };
            json::set(chunk, field, json!(text));
            json::set(chunk, "choices.0.delta.role", json!("assistant"));
            return;
        }

        if let Some(call) = function_call {
            self.has_tool_call = true;
            let name = json::get_str(call, "name").unwrap_or_default();
            let id = synthetic_call_id(name);
            let index = self.tool_call_index;
            self.tool_call_index += 1;

            let entry = json!({
                "id": id,
                "index": index,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": call
                        .get("args")
                        .map(|args| args.to_string())
                        .unwrap_or_default(),
                },
            });
            if json::get(chunk, "choices.0.delta.tool_calls") == Some(&Value::Null) {
                json::set(chunk, "choices.0.delta.tool_calls", json!([]));
            }
            json::append(chunk, "choices.0.delta.tool_calls", entry);
            json::set(chunk, "choices.0.delta.role", json!("assistant"));
            return;
        }

        if let Some(inline) = inline_data {
            let data = json::get_str(inline, "data").unwrap_or_default();
            if data.is_empty() {
                return;
            }
            let mime = json::get_str(inline, "mimeType")
                .or_else(|| json::get_str(inline, "mime_type"))
                .unwrap_or("image/png");
            let entry = json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{mime};base64,{data}")},
            });
            json::append(chunk, "choices.0.delta.images", entry);
            json::set(chunk, "choices.0.delta.role", json!("assistant"));
        }
    }
}

fn apply_usage(chunk: &mut Value, usage: &Value) {
    let prompt = json::get_i64(usage, "promptTokenCount").unwrap_or(0);
    let thoughts = json::get_i64(usage, "thoughtsTokenCount").unwrap_or(0);
    if let Some(candidates) = json::get_i64(usage, "candidatesTokenCount") {
        json::set(chunk, "usage.completion_tokens", json!(candidates));
    }
    if let Some(total) = json::get_i64(usage, "totalTokenCount") {
        json::set(chunk, "usage.total_tokens", json!(total));
    }
    json::set(chunk, "usage.prompt_tokens", json!(prompt + thoughts));
    if thoughts > 0 {
        json::set(
            chunk,
            "usage.completion_tokens_details.reasoning_tokens",
            json!(thoughts),
        );
    }
}

pub(crate) fn synthetic_call_id(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let counter = TOOL_CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{name}-{nanos}-{counter}")
}

fn frame(chunk: &Value) -> Bytes {
    let payload = chunk.to_string();
    let mut data = Vec::with_capacity(payload.len() + 8);
    data.extend_from_slice(b"data: ");
    data.extend_from_slice(payload.as_bytes());
    data.extend_from_slice(b"\n\n");
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unframe(frame: &Bytes) -> Value {
        let text = std::str::from_utf8(frame).unwrap();
        let body = text.strip_prefix("data: ").unwrap().trim_end();
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn reasoning_then_answer_then_usage() {
        let mut state = OpenAiStreamState::new("gemini-3-flash", false);

        let frames = state.push_chunk(
            br#"{"response":{"responseId":"r1","candidates":[{"content":{"parts":[{"text":"let me think","thought":true}]}}]}}"#,
        );
        assert_eq!(frames.len(), 1);
        let chunk = unframe(&frames[0]);
        assert_eq!(chunk["choices"][0]["delta"]["reasoning_content"], "let me think");
        assert_eq!(chunk["choices"][0]["delta"]["content"], Value::Null);
        assert_eq!(chunk["id"], "r1");

        let frames = state.push_chunk(
            br#"{"response":{"candidates":[{"content":{"parts":[{"text":"42"}]}}]}}"#,
        );
        let chunk = unframe(&frames[0]);
        assert_eq!(chunk["choices"][0]["delta"]["content"], "42");
        // Response id carried over from the first chunk.
        assert_eq!(chunk["id"], "r1");

        let frames = state.push_chunk(
            br#"{"response":{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":2,"thoughtsTokenCount":10,"totalTokenCount":17}}}"#,
        );
        let chunk = unframe(&frames[0]);
        assert_eq!(chunk["choices"][0]["finish_reason"], "stop");
        assert_eq!(chunk["usage"]["prompt_tokens"], 15);
        assert_eq!(chunk["usage"]["completion_tokens"], 2);
        assert_eq!(chunk["usage"]["total_tokens"], 17);
        assert_eq!(
            chunk["usage"]["completion_tokens_details"]["reasoning_tokens"],
            10
        );

        let done = state.finish();
        assert_eq!(done.len(), 1);
        assert_eq!(&done[0][..], b"data: [DONE]\n\n");
        // Exactly once.
        assert!(state.finish().is_empty());
    }

    #[test]
    fn thinking_as_content_reroutes_thought_text() {
        let mut state = OpenAiStreamState::new("gemini-3-flash", true);
        let frames = state.push_chunk(
            br#"{"response":{"candidates":[{"content":{"parts":[{"text":"mull","thought":true}]}}]}}"#,
        );
        let chunk = unframe(&frames[0]);
        assert_eq!(chunk["choices"][0]["delta"]["content"], "mull");
        assert_eq!(chunk["choices"][0]["delta"]["reasoning_content"], Value::Null);
    }

    #[test]
    fn tool_call_gets_index_and_synthetic_id() {
        let mut state = OpenAiStreamState::new("gemini-3-flash", false);
        let frames = state.push_chunk(
            br#"{"response":{"candidates":[{"content":{"parts":[{"functionCall":{"name":"add","args":{"a":1,"b":2}}},{"functionCall":{"name":"mul","args":{}}}]}}]}}"#,
        );
        let chunk = unframe(&frames[0]);
        let calls = chunk["choices"][0]["delta"]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["index"], 0);
        assert_eq!(calls[1]["index"], 1);
        assert_eq!(calls[0]["function"]["name"], "add");
        assert_eq!(calls[0]["function"]["arguments"], "{\"a\":1,\"b\":2}");
        assert!(calls[0]["id"].as_str().unwrap().starts_with("add-"));
    }

    #[test]
    fn finish_reason_overrides_to_tool_calls() {
        let mut state = OpenAiStreamState::new("gemini-3-flash", false);
        state.push_chunk(
            br#"{"response":{"candidates":[{"content":{"parts":[{"functionCall":{"name":"add","args":{}}}]}}]}}"#,
        );
        let frames = state.push_chunk(
            br#"{"response":{"candidates":[{"finishReason":"STOP"}]}}"#,
        );
        let chunk = unframe(&frames[0]);
        assert_eq!(chunk["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn inline_data_becomes_image_delta() {
        let mut state = OpenAiStreamState::new("gemini-3-flash", false);
        let frames = state.push_chunk(
            br#"{"response":{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}]}}"#,
        );
        let chunk = unframe(&frames[0]);
        assert_eq!(
            chunk["choices"][0]["delta"]["images"][0]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }

    #[test]
    fn signature_only_parts_are_skipped() {
        let mut state = OpenAiStreamState::new("gemini-3-flash", false);
        let frames = state.push_chunk(
            br#"{"response":{"candidates":[{"content":{"parts":[{"thoughtSignature":"opaque"}]}}]}}"#,
        );
        let chunk = unframe(&frames[0]);
        assert_eq!(chunk["choices"][0]["delta"]["content"], Value::Null);
        assert_eq!(chunk["choices"][0]["delta"]["tool_calls"], Value::Null);
    }

    #[test]
    fn invalid_chunks_produce_nothing() {
        let mut state = OpenAiStreamState::new("gemini-3-flash", false);
        assert!(state.push_chunk(b"not json").is_empty());
        assert!(state.push_chunk(b"[DONE]").is_empty());
    }
}
