// src/indexer/embed_pipeline.rs
// Bounded-concurrency batch embedding for session chunks. A failed embed
// degrades to `None` rather than dropping the chunk — FTS can still find it.

use super::chunker::Chunk;
use crate::embeddings::EmbeddingClient;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

pub const DEFAULT_CONCURRENCY: usize = 5;

pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Option<Vec<f32>>,
}

pub async fn embed_chunks(embedder: &Arc<EmbeddingClient>, chunks: Vec<Chunk>, concurrency: usize) -> Vec<EmbeddedChunk> {
    stream::iter(chunks)
        .map(|chunk| {
            let embedder = embedder.clone();
            async move {
                let embedding = match embedder.embed(&chunk.content).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!("embedding failed for session chunk, storing without a vector: {}", e);
                        None
                    }
                };
                EmbeddedChunk { chunk, embedding }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::indexer::session_parser::{RawMessage, Role};

    fn sample_chunk(content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            source: RawMessage {
                session_id: "s1".into(),
                agent_type: "claude-code".into(),
                message_idx: 1,
                timestamp: None,
                role: Role::User,
                content: content.to_string(),
                source_path: "/tmp/s1.jsonl".into(),
                metadata: serde_json::json!({}),
            },
        }
    }

    #[tokio::test]
    async fn unreachable_embedder_degrades_to_none_for_every_chunk() {
        let embedder = Arc::new(EmbeddingClient::new(&EmbeddingConfig::default()));
        let chunks = vec![sample_chunk("a"), sample_chunk("b")];
        let results = embed_chunks(&embedder, chunks, DEFAULT_CONCURRENCY).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.embedding.is_none()));
    }
}
