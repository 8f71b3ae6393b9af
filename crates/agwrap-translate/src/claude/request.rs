//! Anthropic Messages request → upstream generate-content envelope.

use serde_json::{Value, json};

use agwrap_common::json;
use agwrap_models::registry::Registry;

use crate::THOUGHT_SIGNATURE_PLACEHOLDER;
use crate::safety::attach_default_safety_settings;
use crate::thinking;

/// Converts an Anthropic Messages request body into the upstream
/// envelope. The caller runs [`crate::thinking::finalize`] afterwards.
pub fn to_upstream(registry: &Registry, model: &str, raw: &Value) -> Value {
    let mut out = json!({
        "model": model,
        "request": {"contents": []},
    });

    map_system(raw, &mut out);
    map_messages(model, raw, &mut out);
    map_tools(raw, &mut out);

    if registry.supports_thinking(model)
        && json::get_str(raw, "thinking.type") == Some("enabled")
        && let Some(budget) = json::get_i64(raw, "thinking.budget_tokens")
    {
        json::set(&mut out, thinking::BUDGET_PATH, json!(budget));
        json::set(&mut out, thinking::INCLUDE_PATH, json!(true));
    }

    if let Some(v) = json::get_f64(raw, "temperature") {
        json::set(&mut out, "request.generationConfig.temperature", json!(v));
    }
    if let Some(v) = json::get_f64(raw, "top_p") {
        json::set(&mut out, "request.generationConfig.topP", json!(v));
    }
    if let Some(v) = json::get_i64(raw, "top_k") {
        json::set(&mut out, "request.generationConfig.topK", json!(v));
    }
    if let Some(v) = json::get_i64(raw, "max_tokens") {
        json::set(&mut out, "request.generationConfig.maxOutputTokens", json!(v));
    }

    attach_default_safety_settings(&mut out);
    out
}

fn map_system(raw: &Value, out: &mut Value) {
    let Some(system) = json::get(raw, "system") else {
        return;
    };

    let mut node = json!({"role": "user", "parts": []});
    let mut has_parts = false;

    match system {
        Value::String(text) => {
            if !text.is_empty() {
                json::append(&mut node, "parts", json!({"text": text}));
                has_parts = true;
            }
        }
        Value::Array(blocks) => {
            for block in blocks {
                if json::get_str(block, "type") != Some("text") {
                    continue;
                }
                let mut part = json!({});
                if let Some(text) = json::get_str(block, "text")
                    && !text.is_empty()
                {
                    json::set(&mut part, "text", json!(text));
                }
                json::append(&mut node, "parts", part);
                has_parts = true;
            }
        }
        _ => {}
    }

    if has_parts {
        json::set(out, "request.systemInstruction", node);
    }
}

fn map_messages(model: &str, raw: &Value, out: &mut Value) {
    let Some(messages) = json::get(raw, "messages").and_then(Value::as_array) else {
        return;
    };

    for message in messages {
        let Some(role) = json::get_str(message, "role") else {
            continue;
        };
        let upstream_role = if role == "assistant" { "model" } else { role };
        let mut node = json!({"role": upstream_role, "parts": []});

        match message.get("content") {
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    if let Some(part) = map_block(model, block) {
                        json::append(&mut node, "parts", part);
                    }
                }
                json::append(out, "request.contents", node);
            }
            Some(Value::String(text)) => {
                let mut part = json!({});
                if !text.is_empty() {
                    json::set(&mut part, "text", json!(text.as_str()));
                }
                json::append(&mut node, "parts", part);
                json::append(out, "request.contents", node);
            }
            _ => {}
        }
    }
}

fn map_block(model: &str, block: &Value) -> Option<Value> {
    match json::get_str(block, "type")? {
        "thinking" => {
            let mut part = json!({"thought": true});
            if let Some(text) = json::get_str(block, "thinking")
                && !text.is_empty()
            {
                json::set(&mut part, "text", json!(text));
            }
            let signature = json::get_str(block, "signature")
                .unwrap_or(THOUGHT_SIGNATURE_PLACEHOLDER);
            if !signature.is_empty() {
                json::set(&mut part, "thoughtSignature", json!(signature));
            }
            Some(part)
        }
        "text" => {
            let mut part = json!({});
            if let Some(text) = json::get_str(block, "text")
                && !text.is_empty()
            {
                json::set(&mut part, "text", json!(text));
            }
            Some(part)
        }
        "tool_use" => {
            let args = tool_use_input(block)?;
            let mut part = json!({});
            // Gemini-family models refuse replayed calls without a
            // signature; Claude-family ones refuse the placeholder.
            if !model.contains("claude") {
                json::set(&mut part, "thoughtSignature", json!(THOUGHT_SIGNATURE_PLACEHOLDER));
            }
            if let Some(id) = json::get_str(block, "id")
                && !id.is_empty()
            {
                json::set(&mut part, "functionCall.id", json!(id));
            }
            json::set(
                &mut part,
                "functionCall.name",
                json!(json::get_str(block, "name").unwrap_or_default()),
            );
            json::set(&mut part, "functionCall.args", args);
            Some(part)
        }
        "tool_result" => {
            let id = json::get_str(block, "tool_use_id")?;
            if id.is_empty() {
                return None;
            }
            let mut response = json!({"id": id, "name": function_name_from_id(id)});
            match block.get("content") {
                Some(Value::String(text)) => {
                    json::set(&mut response, "response.result", json!(text.as_str()));
                }
                Some(Value::Array(items)) if items.len() == 1 => {
                    json::set(&mut response, "response.result", items[0].clone());
                }
                Some(value) if !value.is_null() => {
                    json::set(&mut response, "response.result", value.clone());
                }
                _ => {}
            }
            Some(json!({"functionResponse": response}))
        }
        "image" => {
            if json::get_str(block, "source.type") != Some("base64") {
                return None;
            }
            let mut inline = json!({});
            if let Some(mime) = json::get_str(block, "source.media_type")
                && !mime.is_empty()
            {
                json::set(&mut inline, "mime_type", json!(mime));
            }
            if let Some(data) = json::get_str(block, "source.data")
                && !data.is_empty()
            {
                json::set(&mut inline, "data", json!(data));
            }
            Some(json!({"inlineData": inline}))
        }
        _ => None,
    }
}

fn tool_use_input(block: &Value) -> Option<Value> {
    match block.get("input") {
        Some(value @ Value::Object(_)) => Some(value.clone()),
        Some(Value::String(text)) => {
            let parsed: Value = serde_json::from_str(text).ok()?;
            parsed.is_object().then_some(parsed)
        }
        _ => None,
    }
}

/// Synthetic tool-use ids are `<name>-<nanos>-<counter>`; the function
/// name is everything before the trailing two segments. Ids in another
/// shape are used as the name verbatim.
fn function_name_from_id(id: &str) -> String {
    let segments: Vec<&str> = id.split('-').collect();
    if segments.len() > 2 {
        segments[..segments.len() - 2].join("-")
    } else {
        id.to_string()
    }
}

fn map_tools(raw: &Value, out: &mut Value) {
    let Some(tools) = json::get(raw, "tools").and_then(Value::as_array) else {
        return;
    };

    let mut declarations: Vec<Value> = Vec::new();
    for tool in tools {
        let Some(schema) = tool.get("input_schema") else {
            continue;
        };
        if !schema.is_object() {
            continue;
        }
        let mut declaration = tool.clone();
        json::delete(&mut declaration, "input_schema");
        json::set(&mut declaration, "parametersJsonSchema", schema.clone());
        json::delete(&mut declaration, "strict");
        json::delete(&mut declaration, "input_examples");
        declarations.push(declaration);
    }

    if !declarations.is_empty() {
        json::set(
            out,
            "request.tools",
            json!([{"functionDeclarations": declarations}]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::with_defaults()
    }

    #[test]
    fn tool_use_then_tool_result() {
        let registry = registry();
        let raw = json!({
            "model": "gemini-3-flash",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "x"}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"},
                ]},
            ],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        let contents = out["request"]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);

        assert_eq!(contents[0]["role"], "model");
        let call = &contents[0]["parts"][0]["functionCall"];
        assert_eq!(call["id"], "toolu_1");
        assert_eq!(call["name"], "search");
        assert_eq!(call["args"], json!({"q": "x"}));

        assert_eq!(contents[1]["role"], "user");
        let response = &contents[1]["parts"][0]["functionResponse"];
        assert_eq!(response["id"], "toolu_1");
        assert_eq!(response["name"], "toolu_1");
        assert_eq!(response["response"]["result"], "ok");
    }

    #[test]
    fn synthetic_result_ids_recover_the_function_name() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "web-search-1733226000-7", "content": "ok"},
            ]}],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        assert_eq!(
            out["request"]["contents"][0]["parts"][0]["functionResponse"]["name"],
            "web-search"
        );
    }

    #[test]
    fn thinking_blocks_keep_signatures() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "assistant", "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig123"},
                {"type": "text", "text": "done"},
            ]}],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        let parts = out["request"]["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["thought"], true);
        assert_eq!(parts[0]["text"], "hmm");
        assert_eq!(parts[0]["thoughtSignature"], "sig123");
        assert_eq!(parts[1]["text"], "done");
    }

    #[test]
    fn claude_models_skip_the_signature_placeholder() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "assistant", "content": [
                {"type": "tool_use", "id": "t1", "name": "f", "input": {}},
            ]}],
        });
        let gemini = to_upstream(&registry, "gemini-3-flash", &raw);
        assert_eq!(
            gemini["request"]["contents"][0]["parts"][0]["thoughtSignature"],
            THOUGHT_SIGNATURE_PLACEHOLDER
        );
        let claude = to_upstream(&registry, "claude-sonnet-4-5", &raw);
        assert!(
            claude["request"]["contents"][0]["parts"][0]
                .get("thoughtSignature")
                .is_none()
        );
    }

    #[test]
    fn system_blocks_become_system_instruction() {
        let registry = registry();
        let raw = json!({
            "system": [{"type": "text", "text": "be kind"}],
            "messages": [{"role": "user", "content": "hi"}],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        assert_eq!(
            json::get_str(&out, "request.systemInstruction.parts.0.text"),
            Some("be kind")
        );

        let raw = json!({
            "system": "short form",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        assert_eq!(
            json::get_str(&out, "request.systemInstruction.parts.0.text"),
            Some("short form")
        );
    }

    #[test]
    fn base64_image_becomes_inline_data() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {
                    "type": "base64", "media_type": "image/webp", "data": "Zm9v",
                }},
            ]}],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        let inline = &out["request"]["contents"][0]["parts"][0]["inlineData"];
        assert_eq!(inline["mime_type"], "image/webp");
        assert_eq!(inline["data"], "Zm9v");
    }

    #[test]
    fn tools_rename_input_schema() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{
                "name": "search",
                "description": "find things",
                "input_schema": {"type": "object", "properties": {"q": {"type": "string"}}},
                "strict": true,
            }],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        let declaration = &out["request"]["tools"][0]["functionDeclarations"][0];
        assert_eq!(declaration["name"], "search");
        assert!(declaration.get("input_schema").is_none());
        assert!(declaration.get("strict").is_none());
        assert_eq!(
            declaration["parametersJsonSchema"]["properties"]["q"]["type"],
            "string"
        );
    }

    #[test]
    fn thinking_budget_passes_through() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "thinking": {"type": "enabled", "budget_tokens": 4096},
            "max_tokens": 8192,
        });
        let out = to_upstream(&registry, "claude-sonnet-4-5-thinking", &raw);
        assert_eq!(json::get_i64(&out, thinking::BUDGET_PATH), Some(4096));
        assert_eq!(
            json::get_i64(&out, "request.generationConfig.maxOutputTokens"),
            Some(8192)
        );
    }
}
