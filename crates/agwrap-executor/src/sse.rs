//! Upstream stream framing: newline-delimited SSE lines carrying JSON
//! payloads, plus the usage-metadata filter for intermediate chunks.

use serde_json::Value;

use agwrap_common::json;

/// Upper bound for a single SSE line.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("stream line exceeds {MAX_LINE_BYTES} bytes")]
pub struct LineTooLong;

/// Incremental splitter turning arbitrary byte chunks into complete
/// lines.
#[derive(Debug, Default)]
pub struct LineReader {
    buffer: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, LineTooLong> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        if self.buffer.len() > MAX_LINE_BYTES {
            return Err(LineTooLong);
        }
        Ok(lines)
    }

    /// Remaining bytes after the upstream body ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Trims an SSE line, strips a leading `data:` marker and returns the
/// payload when it is valid JSON.
pub fn extract_json_payload(line: &[u8]) -> Option<Value> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    let trimmed = match trimmed.strip_prefix(b"data:") {
        Some(rest) => rest.trim_ascii(),
        None => trimmed,
    };
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_slice(trimmed).ok()
}

/// Drops `usageMetadata` from chunks without a `finishReason`. The counts
/// on intermediate chunks are not authoritative; only the terminal chunk
/// keeps them.
pub fn strip_nonterminal_usage(payload: &mut Value) {
    let finish_reason = json::get_str(payload, "candidates.0.finishReason")
        .or_else(|| json::get_str(payload, "response.candidates.0.finishReason"));
    if matches!(finish_reason, Some(reason) if !reason.is_empty()) {
        return;
    }
    json::delete(payload, "usageMetadata");
    json::delete(payload, "response.usageMetadata");
    json::delete(payload, "usage_metadata");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_lines_across_chunks() {
        let mut reader = LineReader::new();
        let lines = reader.push(b"data: {\"a\":1}\r\ndata: {\"b").unwrap();
        assert_eq!(lines, vec![b"data: {\"a\":1}".to_vec()]);
        let lines = reader.push(b"\":2}\n\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], b"data: {\"b\":2}".to_vec());
        assert!(lines[1].is_empty());
        assert!(reader.finish().is_none());
    }

    #[test]
    fn finish_returns_trailing_partial_line() {
        let mut reader = LineReader::new();
        reader.push(b"data: {\"a\":1}").unwrap();
        assert_eq!(reader.finish().unwrap(), b"data: {\"a\":1}".to_vec());
    }

    #[test]
    fn oversized_line_errors() {
        let mut reader = LineReader::new();
        let big = vec![b'x'; MAX_LINE_BYTES + 1];
        assert!(reader.push(&big).is_err());
    }

    #[test]
    fn extracts_payload_behind_data_marker() {
        assert_eq!(
            extract_json_payload(b"data: {\"x\": 1}").unwrap(),
            json!({"x": 1})
        );
        assert_eq!(extract_json_payload(b"  {\"x\": 1}  ").unwrap(), json!({"x": 1}));
        assert!(extract_json_payload(b"data: [DONE]").is_none());
        assert!(extract_json_payload(b"").is_none());
        assert!(extract_json_payload(b"data:").is_none());
        assert!(extract_json_payload(b"event: ping").is_none());
    }

    #[test]
    fn intermediate_usage_is_stripped() {
        let mut payload = json!({"response": {
            "candidates": [{"content": {"parts": [{"text": "hi"}]}}],
            "usageMetadata": {"promptTokenCount": 5},
        }});
        strip_nonterminal_usage(&mut payload);
        assert!(!json::exists(&payload, "response.usageMetadata"));
    }

    #[test]
    fn terminal_usage_is_kept() {
        let mut payload = json!({"response": {
            "candidates": [{"finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 5},
        }});
        strip_nonterminal_usage(&mut payload);
        assert!(json::exists(&payload, "response.usageMetadata"));
    }

    #[test]
    fn bare_format_usage_is_also_filtered() {
        let mut payload = json!({
            "candidates": [{"content": {}}],
            "usageMetadata": {"promptTokenCount": 1},
        });
        strip_nonterminal_usage(&mut payload);
        assert!(!json::exists(&payload, "usageMetadata"));
    }
}
