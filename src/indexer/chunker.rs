// src/indexer/chunker.rs
// 1 message = 1 chunk in the baseline. Long-message splitting is a named
// extension point (`split_long_messages`) not exercised by the default
// pipeline.

use super::session_parser::RawMessage;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub source: RawMessage,
}

pub fn chunk_messages(messages: Vec<RawMessage>) -> Vec<Chunk> {
    messages
        .into_iter()
        .map(|m| Chunk { content: m.content.clone(), source: m })
        .collect()
}

/// Extension point: split a chunk whose content exceeds `max_chars` into
/// several chunks. Not wired into the default pipeline; a future policy for
/// very long single messages (e.g. huge tool output) would call this.
pub fn split_long_messages(chunks: Vec<Chunk>, _max_chars: usize) -> Vec<Chunk> {
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::session_parser::Role;

    fn message(content: &str) -> RawMessage {
        RawMessage {
            session_id: "s1".into(),
            agent_type: "claude-code".into(),
            message_idx: 1,
            timestamp: None,
            role: Role::User,
            content: content.into(),
            source_path: "/tmp/s1.jsonl".into(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn one_message_becomes_one_chunk() {
        let chunks = chunk_messages(vec![message("a"), message("b")]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "a");
    }
}
