// src/indexer/session_parser.rs
// Normalizes an agent's newline-delimited-JSON session transcript into flat
// messages. One parser handles every agent type: session transcripts differ
// in exact field names but agree on the shape closely enough that a handful
// of fallback lookups cover the known formats.

use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    fn from_str(s: &str) -> Option<Role> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "model" | "ai" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawMessage {
    pub session_id: String,
    pub agent_type: String,
    /// Original line number (1-indexed); stable across deletions.
    pub message_idx: usize,
    pub timestamp: Option<String>,
    pub role: Role,
    pub content: String,
    pub source_path: String,
    pub metadata: Value,
}

fn extract_session_id(value: &Value, path: &Path) -> String {
    value
        .get("session_id")
        .or_else(|| value.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default())
}

fn extract_role(value: &Value) -> Option<Role> {
    value
        .get("role")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .and_then(Role::from_str)
}

fn extract_content(value: &Value) -> Option<String> {
    if let Some(s) = value.get("content").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    // Some transcript formats nest content as [{type: "text", text: "..."}]
    if let Some(arr) = value.get("content").and_then(Value::as_array) {
        let joined: String = arr
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    value.get("text").and_then(Value::as_str).map(str::to_string)
}

/// Parse one session transcript. Malformed and blank lines are skipped
/// silently; `message_idx` always reflects the source line number.
pub fn parse_session_file(text: &str, agent_type: &str, source_path: &Path) -> Vec<RawMessage> {
    let mut messages = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let Some(role) = extract_role(&value) else { continue };
        let Some(content) = extract_content(&value) else { continue };

        messages.push(RawMessage {
            session_id: extract_session_id(&value, source_path),
            agent_type: agent_type.to_string(),
            message_idx: lineno + 1,
            timestamp: value.get("timestamp").and_then(Value::as_str).map(str::to_string),
            role,
            content,
            source_path: source_path.to_string_lossy().to_string(),
            metadata: value,
        });
    }
    messages
}
