use serde::{Deserialize, Serialize};

/// Default reasoning budget injected for thinking-capable models when the
/// client supplied none (the "high" effort level).
pub const DEFAULT_THINKING_BUDGET: i64 = 24576;

/// Budget injected instead of the default for the low-budget flash
/// variant.
pub const MINIMAL_THINKING_BUDGET: i64 = 512;

/// A model's supported internal reasoning budget range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingSupport {
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
    /// Whether a budget of zero (thinking disabled) is accepted.
    #[serde(default)]
    pub zero_allowed: bool,
    /// Whether the dynamic sentinel `-1` ("upstream decides") is accepted.
    #[serde(default)]
    pub dynamic_allowed: bool,
}

/// Maps an OpenAI `reasoning_effort` level to a raw thinking budget.
/// Returns `None` for unknown levels.
pub fn effort_budget(effort: &str) -> Option<i64> {
    match effort.trim().to_ascii_lowercase().as_str() {
        "none" => Some(0),
        "auto" => Some(-1),
        "minimal" => Some(MINIMAL_THINKING_BUDGET),
        "low" => Some(1024),
        "medium" => Some(8192),
        "high" => Some(24576),
        "xhigh" => Some(32768),
        _ => None,
    }
}

/// Normalizes a requested budget against the supported range. `None`
/// means thinking must be disabled for this request (the whole
/// `thinkingConfig` is stripped by the caller).
///
/// Rules: `-1` survives iff dynamic budgets are allowed, otherwise the
/// mid-range stands in. Zero means "disable" when zero is a valid budget,
/// and is raised to the minimum when it is not. A positive budget below
/// the minimum disables thinking; one above the maximum is capped.
pub fn normalize_budget(support: &ThinkingSupport, budget: i64) -> Option<i64> {
    if budget == -1 {
        if support.dynamic_allowed {
            return Some(-1);
        }
        let mid = (support.min + support.max) / 2;
        if mid <= 0 && support.zero_allowed {
            return None;
        }
        if mid <= 0 {
            return Some(support.min);
        }
        return Some(mid);
    }

    if budget == 0 {
        if support.zero_allowed {
            return None;
        }
        return Some(support.min);
    }

    if budget < support.min {
        return None;
    }
    Some(budget.min(support.max))
}
