//! OpenAI Chat Completions request → upstream generate-content envelope.

use std::collections::HashMap;

use serde_json::{Value, json};

use agwrap_common::json;
use agwrap_models::registry::Registry;

use crate::THOUGHT_SIGNATURE_PLACEHOLDER;
use crate::safety::attach_default_safety_settings;
use crate::thinking;

/// Converts an OpenAI Chat Completions request body into the upstream
/// envelope. The caller runs [`crate::thinking::finalize`] afterwards.
pub fn to_upstream(registry: &Registry, model: &str, raw: &Value) -> Value {
    let mut out = json!({
        "project": "",
        "request": {"contents": []},
        "model": model,
    });

    if registry.supports_thinking(model) {
        if let Some(effort) = json::get_str(raw, "reasoning_effort") {
            thinking::apply_reasoning_effort(registry, model, &mut out, effort);
        } else {
            apply_extra_body_thinking(raw, &mut out);
        }
    }

    // Anthropic-style `thinking` object sent on the OpenAI surface.
    if !json::exists(&out, "request.generationConfig.thinkingConfig")
        && registry.supports_thinking(model)
        && json::get_str(raw, "thinking.type") == Some("enabled")
        && let Some(budget) = json::get_i64(raw, "thinking.budget_tokens")
    {
        json::set(&mut out, thinking::BUDGET_PATH, json!(budget));
        json::set(&mut out, thinking::INCLUDE_PATH, json!(true));
    }

    map_sampling_params(raw, &mut out);
    map_modalities(raw, &mut out);
    map_image_config(raw, &mut out);
    map_messages(raw, &mut out);
    map_tools(raw, &mut out);

    attach_default_safety_settings(&mut out);
    out
}

/// Cherry-Studio extension: `extra_body.google.thinking_config` carries a
/// raw thinking configuration in either field-name convention.
fn apply_extra_body_thinking(raw: &Value, out: &mut Value) {
    let Some(config) = json::get(raw, "extra_body.google.thinking_config") else {
        return;
    };
    if !config.is_object() {
        return;
    }

    let budget = config
        .get("thinkingBudget")
        .or_else(|| config.get("thinking_budget"))
        .and_then(Value::as_i64);
    if let Some(budget) = budget {
        json::set(out, thinking::BUDGET_PATH, json!(budget));
    }

    let include = config
        .get("includeThoughts")
        .or_else(|| config.get("include_thoughts"))
        .and_then(Value::as_bool);
    if let Some(include) = include {
        json::set(out, thinking::INCLUDE_PATH, json!(include));
    } else if matches!(budget, Some(b) if b != 0) {
        json::set(out, thinking::INCLUDE_PATH, json!(true));
    }
}

fn map_sampling_params(raw: &Value, out: &mut Value) {
    if let Some(v) = json::get_f64(raw, "temperature") {
        json::set(out, "request.generationConfig.temperature", json!(v));
    }
    if let Some(v) = json::get_f64(raw, "top_p") {
        json::set(out, "request.generationConfig.topP", json!(v));
    }
    if let Some(v) = json::get_i64(raw, "top_k") {
        json::set(out, "request.generationConfig.topK", json!(v));
    }
    if let Some(v) = json::get_i64(raw, "max_tokens") {
        json::set(out, "request.generationConfig.maxOutputTokens", json!(v));
    }
}

fn map_modalities(raw: &Value, out: &mut Value) {
    let Some(modalities) = json::get(raw, "modalities").and_then(Value::as_array) else {
        return;
    };
    let mapped: Vec<Value> = modalities
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|m| match m.to_ascii_lowercase().as_str() {
            "text" => Some(json!("TEXT")),
            "image" => Some(json!("IMAGE")),
            _ => None,
        })
        .collect();
    if !mapped.is_empty() {
        json::set(
            out,
            "request.generationConfig.responseModalities",
            Value::Array(mapped),
        );
    }
}

fn map_image_config(raw: &Value, out: &mut Value) {
    if let Some(ratio) = json::get_str(raw, "image_config.aspect_ratio") {
        json::set(
            out,
            "request.generationConfig.imageConfig.aspectRatio",
            json!(ratio),
        );
    }
    if let Some(size) = json::get_str(raw, "image_config.image_size") {
        json::set(
            out,
            "request.generationConfig.imageConfig.imageSize",
            json!(size),
        );
    }
}

fn map_messages(raw: &Value, out: &mut Value) {
    let Some(messages) = json::get(raw, "messages").and_then(Value::as_array) else {
        return;
    };

    // OpenAI flattens tool results into `tool` messages referencing an
    // earlier assistant call id, so binding takes two passes: id → name
    // from the assistant turns, then id → result from the tool turns.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for message in messages {
        if json::get_str(message, "role") != Some("assistant") {
            continue;
        }
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            continue;
        };
        for call in calls {
            if json::get_str(call, "type") != Some("function") {
                continue;
            }
            if let (Some(id), Some(name)) = (
                json::get_str(call, "id"),
                json::get_str(call, "function.name"),
            ) && !id.is_empty()
                && !name.is_empty()
            {
                call_names.insert(id.to_string(), name.to_string());
            }
        }
    }

    let mut tool_results: HashMap<String, Value> = HashMap::new();
    for message in messages {
        if json::get_str(message, "role") != Some("tool") {
            continue;
        }
        if let Some(id) = json::get_str(message, "tool_call_id")
            && !id.is_empty()
        {
            let content = message.get("content").cloned().unwrap_or(Value::Null);
            tool_results.insert(id.to_string(), content);
        }
    }

    for message in messages {
        let role = json::get_str(message, "role").unwrap_or_default();
        let content = message.get("content").unwrap_or(&Value::Null);

        match role {
            // A lone system message doubles as the user turn; with other
            // messages present it becomes the system instruction.
            "system" if messages.len() > 1 => {
                if let Some(text) = content.as_str() {
                    set_system_instruction(out, text);
                } else if json::get_str(content, "type") == Some("text")
                    && let Some(text) = json::get_str(content, "text")
                {
                    set_system_instruction(out, text);
                }
            }
            "user" | "system" => {
                let mut node = json!({"role": "user", "parts": []});
                fill_user_parts(&mut node, content);
                json::append(out, "request.contents", node);
            }
            "assistant" => {
                map_assistant_message(out, message, content, &call_names, &mut tool_results);
            }
            // `tool` messages were consumed by the binding passes.
            _ => {}
        }
    }
}

fn set_system_instruction(out: &mut Value, text: &str) {
    json::set(out, "request.systemInstruction.role", json!("user"));
    json::set(out, "request.systemInstruction.parts.0.text", json!(text));
}

fn fill_user_parts(node: &mut Value, content: &Value) {
    if let Some(text) = content.as_str() {
        json::set(node, "parts.0.text", json!(text));
        return;
    }
    let Some(items) = content.as_array() else {
        return;
    };
    for item in items {
        match json::get_str(item, "type") {
            Some("text") => {
                if let Some(text) = json::get_str(item, "text") {
                    json::append(node, "parts", json!({"text": text}));
                }
            }
            Some("image_url") => {
                if let Some(url) = json::get_str(item, "image_url.url")
                    && let Some((mime, data)) = parse_data_url(url)
                {
                    json::append(
                        node,
                        "parts",
                        json!({"inlineData": {"mime_type": mime, "data": data}}),
                    );
                }
            }
            _ => {}
        }
    }
}

/// Splits a `data:<mime>;base64,<payload>` URL.
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(';')?;
    let data = payload.strip_prefix("base64,")?;
    if data.is_empty() {
        return None;
    }
    Some((mime, data))
}

fn map_assistant_message(
    out: &mut Value,
    message: &Value,
    content: &Value,
    call_names: &HashMap<String, String>,
    tool_results: &mut HashMap<String, Value>,
) {
    let mut node = json!({"role": "model", "parts": []});
    if let Some(text) = content.as_str()
        && !text.is_empty()
    {
        json::append(&mut node, "parts", json!({"text": text}));
    }

    let mut call_ids: Vec<String> = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            if json::get_str(call, "type") != Some("function") {
                continue;
            }
            let id = json::get_str(call, "id").unwrap_or_default();
            let name = json::get_str(call, "function.name").unwrap_or_default();
            let args = parse_call_arguments(call);
            json::append(
                &mut node,
                "parts",
                json!({
                    "functionCall": {"id": id, "name": name, "args": args},
                    "thoughtSignature": THOUGHT_SIGNATURE_PLACEHOLDER,
                }),
            );
            if !id.is_empty() {
                call_ids.push(id.to_string());
            }
        }
    }

    if node["parts"].as_array().is_some_and(|p| !p.is_empty()) {
        json::append(out, "request.contents", node);
    }

    // Results for every call of this turn are packed into one follow-up
    // user turn with parallel functionResponse parts.
    let mut response_node = json!({"role": "user", "parts": []});
    let mut responses = 0;
    for id in call_ids {
        let Some(name) = call_names.get(&id) else {
            continue;
        };
        let mut part = json!({"functionResponse": {"id": id, "name": name}});
        match tool_results.remove(&id) {
            None => {
                json::set(&mut part, "functionResponse.response.result", json!({}));
            }
            Some(Value::Null) => {}
            Some(result) => {
                json::set(&mut part, "functionResponse.response.result", result);
            }
        }
        json::append(&mut response_node, "parts", part);
        responses += 1;
    }
    if responses > 0 {
        json::append(out, "request.contents", response_node);
    }
}

/// OpenAI encodes call arguments as a JSON string; pass objects through
/// untouched and fall back to an empty object for anything unparsable.
fn parse_call_arguments(call: &Value) -> Value {
    match json::get(call, "function.arguments") {
        Some(Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| json!({}))
        }
        Some(value @ Value::Object(_)) => value.clone(),
        _ => json!({}),
    }
}

fn map_tools(raw: &Value, out: &mut Value) {
    let Some(tools) = json::get(raw, "tools").and_then(Value::as_array) else {
        return;
    };
    if tools.is_empty() {
        return;
    }

    let mut tool_node = json!({});
    let mut has_tool = false;
    for tool in tools {
        if json::get_str(tool, "type") == Some("function")
            && let Some(function) = tool.get("function")
            && function.is_object()
        {
            let mut declaration = function.clone();
            if json::exists(&declaration, "parameters") {
                json::rename(&mut declaration, "parameters", "parametersJsonSchema");
            } else {
                json::set(
                    &mut declaration,
                    "parametersJsonSchema",
                    json!({"type": "object", "properties": {}}),
                );
            }
            json::delete(&mut declaration, "strict");
            json::append(&mut tool_node, "functionDeclarations", declaration);
            has_tool = true;
        }
        if let Some(search) = tool.get("google_search") {
            json::set(&mut tool_node, "googleSearch", search.clone());
            has_tool = true;
        }
    }

    if has_tool {
        json::set(out, "request.tools", json!([tool_node]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thinking::finalize;

    fn registry() -> Registry {
        Registry::with_defaults()
    }

    #[test]
    fn simple_text_request() {
        let registry = registry();
        let raw = json!({
            "model": "gemini-3-flash",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let mut out = to_upstream(&registry, "gemini-3-flash", &raw);
        finalize(&registry, "gemini-3-flash", &mut out);

        assert_eq!(json::get_str(&out, "model"), Some("gemini-3-flash"));
        assert_eq!(
            out["request"]["contents"],
            json!([{"role": "user", "parts": [{"text": "hi"}]}])
        );
        assert_eq!(json::get_i64(&out, thinking::BUDGET_PATH), Some(512));
        let safety = out["request"]["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 4);
        assert!(safety.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
    }

    #[test]
    fn sampling_params_are_preserved() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.7,
            "top_p": 0.9,
            "top_k": 40,
            "max_tokens": 1000,
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        let config = &out["request"]["generationConfig"];
        assert_eq!(config["temperature"], json!(0.7));
        assert_eq!(config["topP"], json!(0.9));
        assert_eq!(config["topK"], json!(40));
        assert_eq!(config["maxOutputTokens"], json!(1000));
    }

    #[test]
    fn system_message_becomes_system_instruction() {
        let registry = registry();
        let raw = json!({
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"},
            ],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        assert_eq!(
            json::get_str(&out, "request.systemInstruction.parts.0.text"),
            Some("be terse")
        );
        assert_eq!(out["request"]["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn lone_system_message_is_the_user_turn() {
        let registry = registry();
        let raw = json!({"messages": [{"role": "system", "content": "hello"}]});
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        assert!(!json::exists(&out, "request.systemInstruction"));
        assert_eq!(
            json::get_str(&out, "request.contents.0.parts.0.text"),
            Some("hello")
        );
    }

    #[test]
    fn image_data_url_becomes_inline_data() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,aGVsbG8="}},
            ]}],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        let parts = out["request"]["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inlineData"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "aGVsbG8=");
    }

    #[test]
    fn tool_calls_and_results_are_rebound() {
        let registry = registry();
        let raw = json!({
            "messages": [
                {"role": "user", "content": "add 1 and 2"},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "add", "arguments": "{\"a\":1,\"b\":2}"}},
                    {"id": "call_2", "type": "function",
                     "function": {"name": "mul", "arguments": "{\"a\":3}"}},
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "3"},
                {"role": "tool", "tool_call_id": "call_2", "content": {"value": 9}},
            ],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        let contents = out["request"]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);

        let model_turn = &contents[1];
        assert_eq!(model_turn["role"], "model");
        assert_eq!(model_turn["parts"][0]["functionCall"]["name"], "add");
        assert_eq!(model_turn["parts"][0]["functionCall"]["args"], json!({"a": 1, "b": 2}));
        assert_eq!(
            model_turn["parts"][0]["thoughtSignature"],
            THOUGHT_SIGNATURE_PLACEHOLDER
        );

        // Both results packed into one follow-up user turn, bound by name.
        let result_turn = &contents[2];
        assert_eq!(result_turn["role"], "user");
        let parts = result_turn["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["functionResponse"]["id"], "call_1");
        assert_eq!(parts[0]["functionResponse"]["name"], "add");
        assert_eq!(parts[0]["functionResponse"]["response"]["result"], "3");
        assert_eq!(parts[1]["functionResponse"]["response"]["result"], json!({"value": 9}));
    }

    #[test]
    fn tools_are_renamed_to_json_schema() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"type": "function", "function": {
                    "name": "search",
                    "description": "web search",
                    "parameters": {"type": "object", "properties": {"q": {"type": "string"}}},
                    "strict": true,
                }},
                {"type": "function", "function": {"name": "noop"}},
            ],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        let declarations = out["request"]["tools"][0]["functionDeclarations"]
            .as_array()
            .unwrap();
        assert_eq!(declarations.len(), 2);
        assert_eq!(
            declarations[0]["parametersJsonSchema"]["properties"]["q"]["type"],
            "string"
        );
        assert!(declarations[0].get("parameters").is_none());
        assert!(declarations[0].get("strict").is_none());
        assert_eq!(
            declarations[1]["parametersJsonSchema"],
            json!({"type": "object", "properties": {}})
        );
    }

    #[test]
    fn anthropic_style_thinking_on_openai_surface() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "thinking": {"type": "enabled", "budget_tokens": 2048},
        });
        let out = to_upstream(&registry, "gemini-2.5-flash", &raw);
        assert_eq!(json::get_i64(&out, thinking::BUDGET_PATH), Some(2048));
        assert_eq!(json::get_bool(&out, thinking::INCLUDE_PATH), Some(true));
    }

    #[test]
    fn modalities_map_to_response_modalities() {
        let registry = registry();
        let raw = json!({
            "messages": [{"role": "user", "content": "draw"}],
            "modalities": ["text", "image"],
        });
        let out = to_upstream(&registry, "gemini-3-flash", &raw);
        assert_eq!(
            out["request"]["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
    }
}
