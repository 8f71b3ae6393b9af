use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::thinking::ThinkingSupport;

/// Capability descriptor for one serveable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Upstream-facing name. Either a `models/<id>` display path or, when
    /// it names a different model id, an alias target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingSupport>,
}

/// Static capability map, built once at startup and read-only afterwards.
#[derive(Debug)]
pub struct Registry {
    models: HashMap<String, ModelInfo>,
}

impl Registry {
    pub fn with_defaults() -> Self {
        let created = OffsetDateTime::now_utc().unix_timestamp();
        let mut models = HashMap::new();
        for info in default_models(created) {
            models.insert(info.id.clone(), info);
        }
        Self { models }
    }

    pub fn get(&self, id: &str) -> Option<&ModelInfo> {
        self.models.get(id)
    }

    /// All descriptors, sorted by id for stable listings.
    pub fn list(&self) -> Vec<&ModelInfo> {
        let mut models: Vec<&ModelInfo> = self.models.values().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub fn supports_thinking(&self, id: &str) -> bool {
        self.get(id).is_some_and(|info| info.thinking.is_some())
    }

    pub fn thinking(&self, id: &str) -> Option<ThinkingSupport> {
        self.get(id)?.thinking
    }

    pub fn max_completion_tokens(&self, id: &str) -> Option<i64> {
        self.get(id)?.max_completion_tokens
    }

    /// Resolves a user-facing id to the upstream model id. Aliasing only
    /// happens when the descriptor's `name` is a distinct model id, not a
    /// `models/<id>` display path.
    pub fn resolve_alias<'a>(&'a self, id: &'a str) -> &'a str {
        if let Some(info) = self.get(id)
            && let Some(name) = info.name.as_deref()
            && name != id
            && !name.starts_with("models/")
        {
            return name;
        }
        id
    }
}

fn default_models(created: i64) -> Vec<ModelInfo> {
    let gemini = |id: &str, display: &str, thinking: ThinkingSupport| ModelInfo {
        id: id.to_string(),
        object: "model".to_string(),
        created,
        owned_by: "antigravity".to_string(),
        display_name: Some(display.to_string()),
        name: Some(format!("models/{id}")),
        max_completion_tokens: None,
        thinking: Some(thinking),
    };
    let claude = |id: &str, display: &str, name: Option<&str>, thinking: Option<ThinkingSupport>| {
        ModelInfo {
            id: id.to_string(),
            object: "model".to_string(),
            created,
            owned_by: "antigravity".to_string(),
            display_name: Some(display.to_string()),
            name: name.map(|n| n.to_string()),
            max_completion_tokens: Some(64000),
            thinking,
        }
    };

    let flash_budget = ThinkingSupport {
        min: 0,
        max: 24576,
        zero_allowed: true,
        dynamic_allowed: true,
    };
    let gemini3_budget = ThinkingSupport {
        min: 128,
        max: 32768,
        zero_allowed: false,
        dynamic_allowed: true,
    };
    let claude_budget = ThinkingSupport {
        min: 1024,
        max: 200000,
        zero_allowed: false,
        dynamic_allowed: true,
    };

    vec![
        gemini("gemini-2.5-flash", "Gemini 2.5 Flash", flash_budget),
        gemini("gemini-3-flash", "Gemini 3 Flash", gemini3_budget),
        gemini(
            "gemini-2.5-flash-lite",
            "Gemini 2.5 Flash Lite",
            flash_budget,
        ),
        gemini("gemini-3-pro-high", "Gemini 3 Pro High", gemini3_budget),
        gemini(
            "gemini-3-pro-low",
            "Gemini 3 Pro Low",
            ThinkingSupport {
                min: 128,
                max: 8192,
                zero_allowed: false,
                dynamic_allowed: true,
            },
        ),
        claude("claude-sonnet-4-5", "Claude Sonnet 4.5", None, None),
        claude(
            "claude-sonnet-4-5-thinking",
            "Claude Sonnet 4.5 (Thinking)",
            None,
            Some(claude_budget),
        ),
        claude(
            "claude-opus-4-5-thinking",
            "Claude Opus 4.5 (Thinking)",
            Some("claude-opus-4-5-thinking"),
            Some(claude_budget),
        ),
        claude(
            "claude-opus-4-5",
            "Claude Opus 4.5",
            Some("claude-opus-4-5-thinking"),
            None,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_present() {
        let registry = Registry::with_defaults();
        assert!(registry.get("gemini-3-flash").is_some());
        assert!(registry.supports_thinking("gemini-2.5-flash"));
        assert!(!registry.supports_thinking("claude-sonnet-4-5"));
        assert!(registry.supports_thinking("claude-sonnet-4-5-thinking"));
        assert_eq!(registry.max_completion_tokens("claude-opus-4-5"), Some(64000));
    }

    #[test]
    fn alias_resolution() {
        let registry = Registry::with_defaults();
        // Display paths are not aliases.
        assert_eq!(registry.resolve_alias("gemini-3-flash"), "gemini-3-flash");
        // Distinct model-id names are.
        assert_eq!(
            registry.resolve_alias("claude-opus-4-5"),
            "claude-opus-4-5-thinking"
        );
        // Self-referencing names are not.
        assert_eq!(
            registry.resolve_alias("claude-opus-4-5-thinking"),
            "claude-opus-4-5-thinking"
        );
        // Unknown ids pass through.
        assert_eq!(registry.resolve_alias("unknown-model"), "unknown-model");
    }

    #[test]
    fn list_is_sorted() {
        let registry = Registry::with_defaults();
        let ids: Vec<&str> = registry.list().iter().map(|m| m.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 9);
    }
}
