//! Non-streaming upstream response → Anthropic message document.

use serde_json::{Value, json};
use tracing::warn;

use agwrap_common::json;

use super::map_stop_reason;

/// Aggregates a complete upstream response into a single Anthropic
/// message. Adjacent parts of the same kind merge into one block, in
/// stream order.
pub fn to_claude_non_stream(raw: &[u8]) -> Option<Value> {
    let parsed: Value = serde_json::from_slice(raw).ok()?;
    let response = parsed.get("response")?;

    let prompt_tokens = json::get_i64(response, "usageMetadata.promptTokenCount").unwrap_or(0);
    let candidate_tokens =
        json::get_i64(response, "usageMetadata.candidatesTokenCount").unwrap_or(0);
    let thought_tokens = json::get_i64(response, "usageMetadata.thoughtsTokenCount").unwrap_or(0);
    let total_tokens = json::get_i64(response, "usageMetadata.totalTokenCount").unwrap_or(0);
    let mut output_tokens = candidate_tokens + thought_tokens;
    if output_tokens == 0 && total_tokens > 0 {
        output_tokens = (total_tokens - prompt_tokens).max(0);
    }

    let mut blocks: Vec<Value> = Vec::new();
    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_counter = 0;
    let mut has_tool_use = false;

    fn flush_text(blocks: &mut Vec<Value>, text: &mut String) {
        if !text.is_empty() {
            blocks.push(json!({"type": "text", "text": std::mem::take(text)}));
        }
    }
    fn flush_thinking(blocks: &mut Vec<Value>, thinking: &mut String) {
        if !thinking.is_empty() {
            blocks.push(json!({"type": "thinking", "thinking": std::mem::take(thinking)}));
        }
    }

    if let Some(parts) = json::get(response, "candidates.0.content.parts").and_then(Value::as_array)
    {
        for part in parts {
            if let Some(part_text) = json::get_str(part, "text")
                && !part_text.is_empty()
            {
                if json::get_bool(part, "thought").unwrap_or(false) {
                    flush_text(&mut blocks, &mut text);
                    thinking.push_str(part_text);
                } else {
                    flush_thinking(&mut blocks, &mut thinking);
                    text.push_str(part_text);
                }
                continue;
            }

            if let Some(call) = part.get("functionCall") {
                flush_thinking(&mut blocks, &mut thinking);
                flush_text(&mut blocks, &mut text);
                has_tool_use = true;
                tool_counter += 1;

                blocks.push(json!({
                    "type": "tool_use",
                    "id": format!("tool_{tool_counter}"),
                    "name": json::get_str(call, "name").unwrap_or_default(),
                    "input": call.get("args").cloned().unwrap_or_else(|| json!({})),
                }));
                continue;
            }

            if part.get("inlineData").is_some() || part.get("inline_data").is_some() {
                warn!("dropping inline image part on the messages surface");
            }
        }
    }
    flush_thinking(&mut blocks, &mut thinking);
    flush_text(&mut blocks, &mut text);

    let finish_reason = json::get_str(response, "candidates.0.finishReason").unwrap_or_default();

    Some(json!({
        "id": json::get_str(response, "responseId").unwrap_or_default(),
        "type": "message",
        "role": "assistant",
        "model": json::get_str(response, "modelVersion").unwrap_or_default(),
        "content": blocks,
        "stop_reason": map_stop_reason(has_tool_use, finish_reason),
        "stop_sequence": null,
        "usage": {
            "input_tokens": prompt_tokens,
            "output_tokens": output_tokens,
        },
    }))
}
