// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Embedding service configuration (`POST /api/embeddings`, health `GET /api/tags`).
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service, e.g. `http://localhost:11434` (HIVE_EMBEDDING_HOST)
    pub host: String,
    /// Model name passed in the request body (HIVE_EMBEDDING_MODEL)
    pub model: String,
    /// Vector dimension; reference implementation uses 1024 (HIVE_EMBEDDING_DIMENSIONS)
    pub dimensions: usize,
    /// Request timeout (HIVE_EMBEDDING_TIMEOUT_SECS)
    pub timeout: Duration,
    /// Max concurrent embedding requests in the session-indexer pipeline (HIVE_EMBEDDING_CONCURRENCY)
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 1024,
            timeout: Duration::from_secs(30),
            concurrency: 5,
        }
    }
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("HIVE_EMBEDDING_HOST").unwrap_or(default.host),
            model: std::env::var("HIVE_EMBEDDING_MODEL").unwrap_or(default.model),
            dimensions: std::env::var("HIVE_EMBEDDING_DIMENSIONS")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(default.dimensions),
            timeout: std::env::var("HIVE_EMBEDDING_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.timeout),
            concurrency: std::env::var("HIVE_EMBEDDING_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.concurrency),
        }
    }
}

/// JSONL sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding the sync files, default `<repo>/.hive` (HIVE_SYNC_DIR)
    pub dir: PathBuf,
    /// Debounce interval before `FlushManager` writes dirty beads (HIVE_FLUSH_DEBOUNCE_MS)
    pub flush_debounce: Duration,
    pub default_tombstone_ttl: Duration,
    pub min_tombstone_ttl: Duration,
    pub clock_skew_grace: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".hive"),
            flush_debounce: Duration::from_millis(2_000),
            default_tombstone_ttl: Duration::from_secs(30 * 24 * 3600),
            min_tombstone_ttl: Duration::from_secs(24 * 3600),
            clock_skew_grace: Duration::from_secs(5 * 60),
        }
    }
}

impl SyncConfig {
    pub fn from_env(repo_root: &std::path::Path) -> Self {
        let default = Self::default();
        let dir = std::env::var("HIVE_SYNC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| repo_root.join(".hive"));
        Self {
            dir,
            flush_debounce: std::env::var("HIVE_FLUSH_DEBOUNCE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.flush_debounce),
            ..default
        }
    }

    pub fn issues_path(&self) -> PathBuf {
        self.dir.join("issues.jsonl")
    }

    pub fn memories_path(&self) -> PathBuf {
        self.dir.join("memories.jsonl")
    }
}

/// Session indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Directories to watch for session transcripts (HIVE_SESSION_DIRS, `:`-separated)
    pub session_dirs: Vec<PathBuf>,
    /// Only files ending with this suffix are indexed (HIVE_SESSION_SUFFIX)
    pub suffix: String,
    /// Per-path debounce before a watcher event is emitted (HIVE_WATCH_DEBOUNCE_MS)
    pub debounce: Duration,
    /// Staleness threshold (HIVE_STALENESS_THRESHOLD_SECS)
    pub staleness_threshold: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            session_dirs: vec![home.join(".claude/projects"), home.join(".codex/sessions")],
            suffix: ".jsonl".to_string(),
            debounce: Duration::from_millis(500),
            staleness_threshold: Duration::from_secs(300),
        }
    }
}

impl IndexerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        let session_dirs = std::env::var("HIVE_SESSION_DIRS")
            .ok()
            .map(|v| v.split(':').map(PathBuf::from).collect())
            .unwrap_or(default.session_dirs);
        Self {
            session_dirs,
            suffix: std::env::var("HIVE_SESSION_SUFFIX").unwrap_or(default.suffix),
            debounce: std::env::var("HIVE_WATCH_DEBOUNCE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.debounce),
            staleness_threshold: std::env::var("HIVE_STALENESS_THRESHOLD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.staleness_threshold),
        }
    }
}

/// Validation accumulator, reported (not fatal) at startup.
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {err}"));
            }
        }
        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warning in &self.warnings {
                lines.push(format!("  - {warning}"));
            }
        }
        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// All environment configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub db_path: PathBuf,
    pub http_port: u16,
    pub embedding: EmbeddingConfig,
    pub sync: SyncConfig,
    pub indexer: IndexerConfig,
    pub wal_threshold_mb: u64,
}

impl EnvConfig {
    pub fn load() -> Self {
        info!("Loading environment configuration");
        let repo_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            db_path: std::env::var("HIVE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join(".hive/hive.db")),
            http_port: std::env::var("HIVE_HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8787),
            embedding: EmbeddingConfig::from_env(),
            sync: SyncConfig::from_env(&repo_root),
            indexer: IndexerConfig::from_env(),
            wal_threshold_mb: std::env::var("HIVE_WAL_THRESHOLD_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }

    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();
        if self.embedding.dimensions == 0 {
            validation.add_error("HIVE_EMBEDDING_DIMENSIONS must be non-zero");
        }
        if self.wal_threshold_mb == 0 {
            validation.add_warning("HIVE_WAL_THRESHOLD_MB is 0; WAL health checks always fail");
        }
        debug!(?self.db_path, ?self.sync.dir, "config loaded");
        validation
    }
}

fn parse_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Hook/CLI log-level override, e.g. `HIVE_LOG_LEVEL=debug`.
pub fn log_level_override() -> Option<String> {
    std::env::var("HIVE_LOG_LEVEL").ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_embedding_config_matches_reference_dimension() {
        let cfg = EmbeddingConfig::default();
        assert_eq!(cfg.dimensions, 1024);
    }

    #[test]
    fn sync_paths_are_under_sync_dir() {
        let cfg = SyncConfig {
            dir: PathBuf::from("/repo/.hive"),
            ..SyncConfig::default()
        };
        assert_eq!(cfg.issues_path(), PathBuf::from("/repo/.hive/issues.jsonl"));
        assert_eq!(
            cfg.memories_path(),
            PathBuf::from("/repo/.hive/memories.jsonl")
        );
    }

    #[test]
    fn validation_flags_zero_dimensions() {
        let mut cfg = EnvConfig {
            db_path: PathBuf::from("test.db"),
            http_port: 8787,
            embedding: EmbeddingConfig::default(),
            sync: SyncConfig::default(),
            indexer: IndexerConfig::default(),
            wal_threshold_mb: 100,
        };
        cfg.embedding.dimensions = 0;
        let validation = cfg.validate();
        assert!(!validation.is_valid());
    }

    #[test]
    fn parse_bool_env_recognizes_common_forms() {
        // SAFETY: test-only env mutation, no other threads read this key.
        unsafe { std::env::set_var("HIVE_TEST_BOOL", "yes") };
        assert_eq!(parse_bool_env("HIVE_TEST_BOOL"), Some(true));
        unsafe { std::env::remove_var("HIVE_TEST_BOOL") };
    }
}
