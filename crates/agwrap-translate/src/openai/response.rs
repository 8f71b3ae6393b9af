//! Non-streaming upstream response → OpenAI chat completion document.

use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use agwrap_common::json;

/// Aggregates a complete upstream response into a single
/// `chat.completion` document.
pub fn to_openai_non_stream(raw: &[u8], thinking_as_content: bool) -> Option<Value> {
    let parsed: Value = serde_json::from_slice(raw).ok()?;
    let response = parsed.get("response")?;

    let mut out = json!({
        "id": "",
        "object": "chat.completion",
        "created": 0,
        "model": "",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "reasoning_content": null,
                "tool_calls": null,
            },
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
    });

    if let Some(model) = json::get_str(response, "modelVersion") {
        json::set(&mut out, "model", json!(model));
    }
    if let Some(id) = json::get_str(response, "responseId") {
        json::set(&mut out, "id", json!(id));
    }
    if let Some(create_time) = json::get_str(response, "createTime")
        && let Ok(stamp) = OffsetDateTime::parse(create_time, &Rfc3339)
    {
        json::set(&mut out, "created", json!(stamp.unix_timestamp()));
    }
    if let Some(reason) = json::get_str(response, "candidates.0.finishReason") {
        json::set(
            &mut out,
            "choices.0.finish_reason",
            json!(reason.to_ascii_lowercase()),
        );
    }

    if let Some(usage) = response.get("usageMetadata") {
        let prompt = json::get_i64(usage, "promptTokenCount").unwrap_or(0);
        let candidates = json::get_i64(usage, "candidatesTokenCount").unwrap_or(0);
        let thoughts = json::get_i64(usage, "thoughtsTokenCount").unwrap_or(0);
        let total = json::get_i64(usage, "totalTokenCount").unwrap_or(0);
        json::set(&mut out, "usage.prompt_tokens", json!(prompt));
        json::set(&mut out, "usage.completion_tokens", json!(candidates));
        json::set(&mut out, "usage.total_tokens", json!(total));
        if thoughts > 0 {
            json::set(
                &mut out,
                "usage.completion_tokens_details.reasoning_tokens",
                json!(thoughts),
            );
        }
    }

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut images: Vec<Value> = Vec::new();

    if let Some(parts) = json::get(response, "candidates.0.content.parts").and_then(Value::as_array)
    {
        for part in parts {
            if let Some(text) = json::get_str(part, "text") {
                if json::get_bool(part, "thought").unwrap_or(false) && !thinking_as_content {
                    reasoning.push_str(text);
                } else {
                    content.push_str(text);
                }
                continue;
            }

            if let Some(call) = part.get("functionCall") {
                let name = json::get_str(call, "name").unwrap_or_default();
                tool_calls.push(json!({
                    "id": format!("{name}-{}", tool_calls.len()),
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": call
                            .get("args")
                            .map(|args| args.to_string())
                            .unwrap_or_default(),
                    },
                }));
                continue;
            }

            if let Some(inline) = part.get("inlineData") {
                let data = json::get_str(inline, "data").unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let mime = json::get_str(inline, "mimeType")
                    .or_else(|| json::get_str(inline, "mime_type"))
                    .unwrap_or("image/png");
                images.push(json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:{mime};base64,{data}")},
                }));
            }
        }
    }

    if !content.is_empty() {
        json::set(&mut out, "choices.0.message.content", json!(content));
    }
    if !reasoning.is_empty() {
        json::set(&mut out, "choices.0.message.reasoning_content", json!(reasoning));
    }
    if !tool_calls.is_empty() {
        json::set(&mut out, "choices.0.message.tool_calls", Value::Array(tool_calls));
        json::set(&mut out, "choices.0.finish_reason", json!("tool_calls"));
    }
    if !images.is_empty() {
        json::set(&mut out, "choices.0.message.images", Value::Array(images));
    }

    Some(out)
}
