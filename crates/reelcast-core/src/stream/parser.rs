//! Progress line classification
//!
//! Each `data:` payload of the creation stream is one line of a small
//! text protocol. Sentinels overlap with free text, so rules are checked
//! in a fixed order and the first match wins.

use serde_json::Value;
use tracing::debug;

/// End-of-job sentinel
pub const DONE_SENTINEL: &str = "DONE";

/// Job error sentinel prefix
pub const ERROR_SENTINEL: &str = "ERROR";

/// Bytes stripped from an error line: `ERROR: `
const ERROR_PREFIX_LEN: usize = 7;

/// Marker for lines that may carry the session id
const SESSION_ID_FIELD: &str = "user_id";

/// A classified protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Job finished normally
    Completion,
    /// Job failed with a server supplied reason
    Error { message: String },
    /// Session id became known; `raw_line` is kept for the progress log
    SessionAssigned { id: String, raw_line: String },
    /// Informational line, logged verbatim
    Progress { text: String },
}

impl StreamEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Completion | StreamEvent::Error { .. })
    }
}

/// Classify a single protocol line. Never fails.
pub fn parse_line(line: &str) -> StreamEvent {
    if line == DONE_SENTINEL {
        return StreamEvent::Completion;
    }

    if line.starts_with(ERROR_SENTINEL) {
        return StreamEvent::Error {
            message: error_message(line).to_string(),
        };
    }

    if line.contains(SESSION_ID_FIELD) {
        if let Some(id) = extract_session_id(line) {
            return StreamEvent::SessionAssigned {
                id,
                raw_line: line.to_string(),
            };
        }
        debug!("Line mentions {} but carries no usable id", SESSION_ID_FIELD);
    }

    StreamEvent::Progress {
        text: line.to_string(),
    }
}

/// Text after the fixed `ERROR: ` prefix.
///
/// Lines no longer than the prefix give an empty message. If the prefix
/// boundary splits a multi-byte char, the message starts at the next char.
fn error_message(line: &str) -> &str {
    let start = (ERROR_PREFIX_LEN..=line.len())
        .find(|i| line.is_char_boundary(*i))
        .unwrap_or(line.len());
    &line[start..]
}

/// Pull a non-empty string `user_id` out of a JSON object line
fn extract_session_id(line: &str) -> Option<String> {
    let json: Value = serde_json::from_str(line).ok()?;
    json.get(SESSION_ID_FIELD)
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
