//! Thinking-budget policy applied to outgoing upstream payloads.
//!
//! The request translators copy whatever budget directive the client sent;
//! this module then resolves it against the model descriptor: default
//! injection for thinking-capable models, effort-level mapping on the
//! OpenAI surface, clamping against `maxOutputTokens` and the descriptor
//! bounds, and stripping the whole `thinkingConfig` when the result would
//! be invalid.

use serde_json::{Value, json};

use agwrap_common::json;
use agwrap_models::registry::Registry;
use agwrap_models::thinking::{
    DEFAULT_THINKING_BUDGET, MINIMAL_THINKING_BUDGET, normalize_budget,
};

pub(crate) const BUDGET_PATH: &str =
    "request.generationConfig.thinkingConfig.thinkingBudget";
pub(crate) const INCLUDE_PATH: &str =
    "request.generationConfig.thinkingConfig.include_thoughts";
const CONFIG_PATH: &str = "request.generationConfig.thinkingConfig";
const MAX_TOKENS_PATH: &str = "request.generationConfig.maxOutputTokens";

/// Applies an OpenAI `reasoning_effort` directive to the payload.
///
/// `none` disables thinking only when the model accepts a zero budget;
/// otherwise the directive is discarded so default injection applies.
pub fn apply_reasoning_effort(
    registry: &Registry,
    model: &str,
    payload: &mut Value,
    effort: &str,
) {
    let normalized = effort.trim().to_ascii_lowercase();
    if normalized == "none" {
        if let Some(support) = registry.thinking(model)
            && support.zero_allowed
        {
            json::set(payload, BUDGET_PATH, json!(0));
            json::set(payload, INCLUDE_PATH, json!(false));
        }
        return;
    }
    if let Some(budget) = agwrap_models::thinking::effort_budget(&normalized) {
        json::set(payload, BUDGET_PATH, json!(budget));
        json::set(payload, INCLUDE_PATH, json!(true));
    }
}

/// Final thinking normalization, run after request translation:
/// default injection, clamping and the strip rules.
pub fn finalize(registry: &Registry, model: &str, payload: &mut Value) {
    if !registry.supports_thinking(model) {
        json::delete(payload, CONFIG_PATH);
        return;
    }

    if json::get_i64(payload, BUDGET_PATH).is_none() {
        let budget = if model == "gemini-3-flash" {
            MINIMAL_THINKING_BUDGET
        } else {
            DEFAULT_THINKING_BUDGET
        };
        json::set(payload, BUDGET_PATH, json!(budget));
        json::set(payload, INCLUDE_PATH, json!(true));
    }

    let requested = json::get_i64(payload, BUDGET_PATH).unwrap_or(0);
    let support = registry
        .thinking(model)
        .expect("thinking-capable model has support descriptor");

    let Some(mut budget) = normalize_budget(&support, requested) else {
        json::delete(payload, CONFIG_PATH);
        return;
    };

    // Claude-family descriptors carry a completion-token ceiling that
    // applies even when the client sent no max_tokens.
    if json::get_i64(payload, MAX_TOKENS_PATH).is_none()
        && let Some(max) = registry.max_completion_tokens(model)
        && max > 0
    {
        json::set(payload, MAX_TOKENS_PATH, json!(max));
    }

    // The budget must stay strictly below maxOutputTokens.
    if budget >= 0
        && let Some(max_tokens) = json::get_i64(payload, MAX_TOKENS_PATH)
        && max_tokens > 0
        && budget >= max_tokens
    {
        budget = max_tokens - 1;
        if budget < support.min {
            json::delete(payload, CONFIG_PATH);
            return;
        }
    }

    json::set(payload, BUDGET_PATH, json!(budget));
    if json::get_bool(payload, INCLUDE_PATH).is_none() {
        json::set(payload, INCLUDE_PATH, json!(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::with_defaults()
    }

    #[test]
    fn default_injection_for_thinking_models() {
        let registry = registry();
        let mut payload = json!({"model": "gemini-3-pro-high", "request": {}});
        finalize(&registry, "gemini-3-pro-high", &mut payload);
        assert_eq!(json::get_i64(&payload, BUDGET_PATH), Some(24576));
        assert_eq!(json::get_bool(&payload, INCLUDE_PATH), Some(true));
    }

    #[test]
    fn flash_default_is_minimal() {
        let registry = registry();
        let mut payload = json!({"model": "gemini-3-flash", "request": {}});
        finalize(&registry, "gemini-3-flash", &mut payload);
        assert_eq!(json::get_i64(&payload, BUDGET_PATH), Some(512));
    }

    #[test]
    fn non_thinking_models_lose_the_config() {
        let registry = registry();
        let mut payload = json!({"request": {"generationConfig": {
            "thinkingConfig": {"thinkingBudget": 1000}
        }}});
        finalize(&registry, "claude-sonnet-4-5", &mut payload);
        assert!(!json::exists(&payload, CONFIG_PATH));
    }

    #[test]
    fn medium_effort_maps_to_8192() {
        let registry = registry();
        let mut payload = json!({"request": {}});
        apply_reasoning_effort(&registry, "gemini-3-pro-high", &mut payload, "medium");
        finalize(&registry, "gemini-3-pro-high", &mut payload);
        assert_eq!(json::get_i64(&payload, BUDGET_PATH), Some(8192));
    }

    #[test]
    fn none_disables_only_when_zero_allowed() {
        let registry = registry();

        let mut payload = json!({"request": {}});
        apply_reasoning_effort(&registry, "gemini-2.5-flash", &mut payload, "none");
        finalize(&registry, "gemini-2.5-flash", &mut payload);
        assert!(!json::exists(&payload, CONFIG_PATH));

        // gemini-3-flash rejects zero budgets: the directive is discarded
        // and default injection takes over.
        let mut payload = json!({"request": {}});
        apply_reasoning_effort(&registry, "gemini-3-flash", &mut payload, "none");
        finalize(&registry, "gemini-3-flash", &mut payload);
        assert_eq!(json::get_i64(&payload, BUDGET_PATH), Some(512));
    }

    #[test]
    fn below_minimum_strips_the_config() {
        let registry = registry();
        let mut payload = json!({"request": {"generationConfig": {
            "thinkingConfig": {"thinkingBudget": 512, "include_thoughts": true}
        }}});
        finalize(&registry, "claude-sonnet-4-5-thinking", &mut payload);
        assert!(!json::exists(&payload, CONFIG_PATH));
    }

    #[test]
    fn budget_stays_below_max_output_tokens() {
        let registry = registry();
        let mut payload = json!({"request": {"generationConfig": {
            "maxOutputTokens": 2048,
            "thinkingConfig": {"thinkingBudget": 8192, "include_thoughts": true}
        }}});
        finalize(&registry, "claude-sonnet-4-5-thinking", &mut payload);
        assert_eq!(json::get_i64(&payload, BUDGET_PATH), Some(2047));
    }

    #[test]
    fn claude_default_max_tokens_comes_from_descriptor() {
        let registry = registry();
        let mut payload = json!({"request": {"generationConfig": {
            "thinkingConfig": {"thinkingBudget": 100000, "include_thoughts": true}
        }}});
        finalize(&registry, "claude-opus-4-5-thinking", &mut payload);
        assert_eq!(json::get_i64(&payload, MAX_TOKENS_PATH), Some(64000));
        // 100000 >= 64000, reduced to stay strictly below.
        assert_eq!(json::get_i64(&payload, BUDGET_PATH), Some(63999));
    }

    #[test]
    fn dynamic_budget_survives_when_allowed() {
        let registry = registry();
        let mut payload = json!({"request": {"generationConfig": {
            "thinkingConfig": {"thinkingBudget": -1, "include_thoughts": true}
        }}});
        finalize(&registry, "gemini-2.5-flash", &mut payload);
        assert_eq!(json::get_i64(&payload, BUDGET_PATH), Some(-1));
    }
}
