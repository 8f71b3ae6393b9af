use serde_json::{Value, json};

use agwrap_common::json;

/// Attaches the default safety settings the upstream expects: every harm
/// category explicitly set to BLOCK_NONE.
pub(crate) fn attach_default_safety_settings(out: &mut Value) {
    let settings = json!([
        {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"},
    ]);
    json::set(out, "request.safetySettings", settings);
}
