//! Final upstream envelope shaping: identity fields, per-request ids and
//! the Claude-family schema scrub.

use rand::Rng;
use serde_json::{Value, json};
use uuid::Uuid;

use agwrap_common::json;
use agwrap_models::registry::Registry;

/// Sent both as the HTTP User-Agent (unless the credential overrides it)
/// and inside the envelope's `userAgent` field.
pub const DEFAULT_USER_AGENT: &str = "antigravity/1.11.5 windows/amd64";

const SCRUBBED_SCHEMA_KEYS: &[&str] = &[
    "$schema",
    "$ref",
    "$defs",
    "minItems",
    "maxItems",
    "minLength",
    "maxLength",
    "exclusiveMinimum",
    "exclusiveMaximum",
];

/// Injects the envelope fields every upstream call needs and applies the
/// model-family payload rules.
pub fn shape(registry: &Registry, model: &str, payload: &mut Value, project_id: &str) {
    let internal_model = registry.resolve_alias(model);
    json::set(payload, "model", json!(internal_model));
    json::set(payload, "userAgent", json!("antigravity"));

    let project = if project_id.trim().is_empty() {
        synthetic_project_id()
    } else {
        project_id.to_string()
    };
    json::set(payload, "project", json!(project));
    json::set(payload, "requestId", json!(format!("agent-{}", Uuid::new_v4())));
    json::set(payload, "request.sessionId", json!(session_id()));
    json::set(
        payload,
        "request.toolConfig.functionCallingConfig.mode",
        json!("VALIDATED"),
    );

    if model.to_ascii_lowercase().contains("claude") {
        scrub_claude_schema(payload);
    } else {
        // Gemini-family models compute their own output ceiling.
        json::delete(payload, "request.generationConfig.maxOutputTokens");
    }
}

/// The upstream's Claude surface speaks a stricter schema dialect:
/// `parameters` instead of `parametersJsonSchema`, no JSON-Schema meta
/// keys, no bounds keywords, and no union types.
fn scrub_claude_schema(payload: &mut Value) {
    loop {
        let Some(path) = json::find_paths(payload, "parametersJsonSchema")
            .into_iter()
            .next()
        else {
            break;
        };
        let parent = path
            .strip_suffix("parametersJsonSchema")
            .unwrap_or_default();
        json::rename(payload, &path, &format!("{parent}parameters"));
    }

    for key in SCRUBBED_SCHEMA_KEYS {
        loop {
            let paths = json::find_paths(payload, key);
            let Some(path) = paths.first() else {
                break;
            };
            json::delete(payload, path);
        }
    }

    // Collapse every anyOf to its first alternative.
    loop {
        let Some(path) = json::find_paths(payload, "anyOf").into_iter().next() else {
            break;
        };
        let first = json::get(payload, &path)
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned();
        match first {
            Some(replacement) => {
                let parent = path.strip_suffix(".anyOf").unwrap_or(&path);
                json::set(payload, parent, replacement);
            }
            None => {
                json::delete(payload, &path);
            }
        }
    }
}

/// Upstream session ids are negative decimals drawn from the full
/// 63-bit range.
fn session_id() -> String {
    let n: i64 = rand::rng().random_range(0..9_000_000_000_000_000_000);
    format!("-{n}")
}

/// Stand-in project identifier for credentials without one.
fn synthetic_project_id() -> String {
    const ADJECTIVES: &[&str] = &["useful", "bright", "swift", "calm", "bold"];
    const NOUNS: &[&str] = &["fuze", "wave", "spark", "flow", "core"];
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{adjective}-{noun}-{}", &suffix[..5])
}
