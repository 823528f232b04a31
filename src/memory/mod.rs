// src/memory/mod.rs
// Semantic memory store: orchestrates embedding generation against
// `db::memory`'s vector/FTS storage, with the vector-primary,
// FTS-on-failure fallback policy and score time-decay.

use crate::db::memory::{self as store, Memory, NewMemory as StoreNewMemory, ScoredMemory};
use crate::db::pool::DatabasePool;
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::utils::truncate;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Vectors scoring below this are dropped even before FTS fallback kicks in.
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.3;
const DECAY_HALF_LIFE_DAYS: f64 = 90.0;
const EXCERPT_CHARS: usize = 200;

pub struct MemoryStore {
    pool: Arc<DatabasePool>,
    embedder: Arc<EmbeddingClient>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreRequest {
    pub content: String,
    pub metadata: Option<Value>,
    pub collection: String,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub agent_type: Option<String>,
    pub session_id: Option<String>,
    pub message_role: Option<String>,
    pub message_idx: Option<i64>,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FindOptions {
    pub limit: i64,
    pub threshold: f64,
    pub force_fts: bool,
    pub expand: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: DEFAULT_SCORE_THRESHOLD,
            force_fts: false,
            expand: false,
        }
    }
}

impl MemoryStore {
    pub fn new(pool: Arc<DatabasePool>, embedder: Arc<EmbeddingClient>) -> Self {
        Self { pool, embedder }
    }

    pub async fn store(&self, req: StoreRequest) -> Result<Memory> {
        let id = Uuid::new_v4().to_string();
        let embedding = match self.embedder.embed(&req.content).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("embedding failed, storing memory without a vector: {}", e);
                None
            }
        };
        let new = StoreNewMemory {
            content: req.content,
            metadata: req.metadata,
            collection: req.collection,
            confidence: req.confidence,
            tags: req.tags,
            agent_type: req.agent_type,
            session_id: req.session_id,
            message_role: req.message_role,
            message_idx: req.message_idx,
            source_path: req.source_path,
        };
        self.pool
            .run(move |conn| store::store(conn, &id, &new, embedding.as_deref()))
            .await
    }

    /// Vector search first; falls back to FTS if embedding fails, the
    /// caller asked for `force_fts`, or the vector search comes back empty.
    /// Results are time-decayed and excerpted before return.
    pub async fn find(&self, query: &str, opts: FindOptions) -> Result<Vec<ScoredMemory>> {
        let vector_results = if opts.force_fts {
            None
        } else {
            match self.embedder.embed(query).await {
                Ok(embedding) => {
                    let limit = opts.limit;
                    let threshold = opts.threshold;
                    self.pool
                        .run(move |conn| store::vector_search(conn, &embedding, limit, threshold))
                        .await
                        .ok()
                }
                Err(e) => {
                    tracing::warn!("embedding failed for query, falling back to FTS: {}", e);
                    None
                }
            }
        };

        let results = match vector_results {
            Some(r) if !r.is_empty() => r,
            _ => {
                let query = query.to_string();
                let limit = opts.limit;
                self.pool.run(move |conn| store::fts_search(conn, &query, limit)).await?
            }
        };

        Ok(apply_decay_and_excerpt(results, opts.expand))
    }

    pub async fn validate(&self, id: &str) -> Result<Memory> {
        let id = id.to_string();
        self.pool.run(move |conn| store::validate(conn, &id)).await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.pool.run(move |conn| store::remove(conn, &id)).await
    }

    pub async fn list(&self, collection: Option<String>, limit: i64) -> Result<Vec<Memory>> {
        self.pool
            .run(move |conn| store::list(conn, collection.as_deref(), limit))
            .await
    }

    pub async fn stats(&self) -> Result<store::MemoryStats> {
        self.pool.run(store::stats).await
    }

    pub async fn check_health(&self) -> Result<String> {
        self.pool.run(store::check_health).await
    }
}

fn apply_decay_and_excerpt(results: Vec<ScoredMemory>, expand: bool) -> Vec<ScoredMemory> {
    let now = Utc::now();
    let mut decayed: Vec<ScoredMemory> = results
        .into_iter()
        .map(|mut scored| {
            let age_days = DateTime::parse_from_rfc3339(&scored.memory.created_at)
                .map(|created| (now - created.with_timezone(&Utc)).num_seconds() as f64 / 86400.0)
                .unwrap_or(0.0)
                .max(0.0);
            let decay = 0.5_f64.powf(age_days / DECAY_HALF_LIFE_DAYS);
            scored.score *= decay;
            if !expand {
                scored.memory.content = truncate(&scored.memory.content, EXCERPT_CHARS);
            }
            scored
        })
        .collect();
    decayed.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    decayed
}
