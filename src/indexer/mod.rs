// src/indexer/mod.rs
// Session indexer: file watcher -> JSONL parser -> chunker -> embedder ->
// store -> staleness tracker -> viewer. Makes past agent conversations
// searchable through the same semantic memory store used for everything
// else.

pub mod agent_type;
pub mod chunker;
pub mod embed_pipeline;
pub mod session_parser;
pub mod staleness;
pub mod viewer;
pub mod watcher;

use crate::config::IndexerConfig;
use crate::db::pool::DatabasePool;
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::memory::{MemoryStore, StoreRequest};
use agent_type::AgentTypeRules;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use watcher::{FileWatcher, WatchEventKind};

pub use viewer::{ViewRequest, view};

pub struct SessionIndexer {
    config: IndexerConfig,
    pool: Arc<DatabasePool>,
    memory: Arc<MemoryStore>,
    embedder: Arc<EmbeddingClient>,
    embed_concurrency: usize,
    agent_rules: Mutex<AgentTypeRules>,
}

impl SessionIndexer {
    pub fn new(config: IndexerConfig, pool: Arc<DatabasePool>, memory: Arc<MemoryStore>, embedder: Arc<EmbeddingClient>, embed_concurrency: usize) -> Self {
        Self { config, pool, memory, embedder, embed_concurrency, agent_rules: Mutex::new(AgentTypeRules::default()) }
    }

    /// Index one session file if it's stale, regardless of the watcher.
    /// Used both by the watcher loop and by an explicit backfill pass.
    pub async fn index_file(&self, path: &Path) -> Result<usize> {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return Ok(0);
        };
        let mtime = meta.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64).unwrap_or(0);
        let path_str = path.to_string_lossy().to_string();

        let is_stale = self.pool.run({
            let path_str = path_str.clone();
            move |conn| staleness::check(conn, &path_str, mtime)
        }).await?;
        if !is_stale {
            return Ok(0);
        }

        let Some(agent_type) = self.agent_rules.lock().await.detect(path) else {
            warn!("no agent-type rule matched {}, skipping", path.display());
            return Ok(0);
        };

        let text = tokio::fs::read_to_string(path).await?;
        let messages = session_parser::parse_session_file(&text, &agent_type, path);
        let message_count = messages.len();
        let chunks = chunker::chunk_messages(messages);
        let embedded = embed_pipeline::embed_chunks(&self.embedder, chunks, self.embed_concurrency).await;

        for item in embedded {
            let source = item.chunk.source;
            self.memory
                .store(StoreRequest {
                    content: item.chunk.content,
                    metadata: Some(source.metadata),
                    collection: "sessions".to_string(),
                    confidence: 1.0,
                    tags: vec![],
                    agent_type: Some(source.agent_type),
                    session_id: Some(source.session_id),
                    message_role: Some(source.role.as_str().to_string()),
                    message_idx: Some(source.message_idx as i64),
                    source_path: Some(source.source_path),
                })
                .await?;
        }

        self.pool.run(move |conn| staleness::record_indexed(conn, &path_str, mtime, message_count as i64)).await?;
        Ok(message_count)
    }

    /// Run the watcher loop until stopped. Each `added`/`changed` event
    /// triggers `index_file`; `unlinked` sessions are left alone (the
    /// indexer never mutates its source directory and stale index rows for
    /// deleted files are harmless).
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut watcher = FileWatcher::spawn(self.config.session_dirs.clone(), self.config.suffix.clone(), self.config.debounce);
        let _ = (&mut watcher.ready).await;
        info!("session indexer watching {} director{}", self.config.session_dirs.len(), if self.config.session_dirs.len() == 1 { "y" } else { "ies" });

        loop {
            tokio::select! {
                event = watcher.events.recv() => {
                    match event {
                        None => break,
                        Some(ev) => {
                            if matches!(ev.kind, WatchEventKind::Added | WatchEventKind::Changed) {
                                match self.index_file(&ev.path).await {
                                    Ok(0) => {}
                                    Ok(n) => info!(path = %ev.path.display(), messages = n, "indexed session file"),
                                    Err(e) => warn!(path = %ev.path.display(), "failed to index session file: {}", e),
                                }
                            }
                        }
                    }
                }
                error = watcher.errors.recv() => {
                    if let Some(msg) = error {
                        warn!("session watcher error: {}", msg);
                    }
                }
            }
        }
        watcher.stop().await;
        Ok(())
    }
}
