//! Parser for the agent CLI's NDJSON event stream.
//!
//! The CLI's schema has drifted across releases, so text and session ids
//! are located by a fallback search over the shapes we have seen in the
//! wild. All of that probing lives here, behind one closed enum; callers
//! never touch raw JSON.

use serde_json::Value;

/// One classified event from the agent's stdout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentEvent {
    /// Internal reasoning; never surfaced to the user.
    Thinking,
    /// The final result summary; never surfaced (its text duplicates what
    /// was already streamed).
    Result,
    /// Assistant-authored text to flush to the user.
    Text(String),
    /// Recognized JSON with no displayable text; ignored.
    Unknown,
}

/// A parsed event line: the classified event plus any session token the
/// line carried (session extraction is independent of event kind).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLine {
    pub event: AgentEvent,
    pub session: Option<String>,
}

/// Parse one stdout line. Returns `None` for blank or malformed lines;
/// those are skipped by the runner, never fatal.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;

    let session = extract_session(&value);
    let kind = value
        .get("type")
        .or_else(|| value.get("role"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase());

    let event = match kind.as_deref() {
        Some("thinking") => AgentEvent::Thinking,
        Some("result") => AgentEvent::Result,
        _ => match extract_text(&value) {
            Some(text) => AgentEvent::Text(text),
            None => AgentEvent::Unknown,
        },
    };

    Some(ParsedLine { event, session })
}

fn extract_session(value: &Value) -> Option<String> {
    for key in ["session_id", "sessionId", "chatId"] {
        match value.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Locate assistant-authored text: first the nested list-of-typed-parts
/// shape (`message.content[]` or `content[]` with `{type: "text", text}`),
/// then the flat single-field shapes.
fn extract_text(value: &Value) -> Option<String> {
    let parts = value
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| value.get("content"))
        .and_then(|c| c.as_array());

    if let Some(parts) = parts {
        let mut out = String::new();
        for part in parts {
            if part.get("type").and_then(|t| t.as_str()) == Some("text") {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    out.push_str(text);
                }
            }
        }
        if !out.is_empty() {
            return Some(out);
        }
    }

    for key in ["text", "content", "response", "message", "output"] {
        if let Some(Value::String(s)) = value.get(key) {
            return Some(s.clone());
        }
    }
    None
}
