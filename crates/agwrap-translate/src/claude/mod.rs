pub mod request;
pub mod response;
pub mod stream;

pub use request::to_upstream;
pub use response::to_claude_non_stream;
pub use stream::ClaudeStreamState;

/// Terminal-signal mapping shared by the streaming and non-streaming
/// response paths. A tool call anywhere in the response wins.
pub(crate) fn map_stop_reason(has_tool_use: bool, finish_reason: &str) -> &'static str {
    if has_tool_use {
        return "tool_use";
    }
    match finish_reason {
        "MAX_TOKENS" => "max_tokens",
        _ => "end_turn",
    }
}
