// db/pool.rs
// Async connection pool using deadpool-sqlite.
//
// # Usage
//
// Use `pool.interact()` for anyhow-based call sites and `pool.run()` when the
// closure already returns `Result<_, HiveError>`. Use the `_with_retry`
// variants for writes that must survive transient SQLITE_BUSY/SQLITE_LOCKED
// contention (embedding stores, projection updates).

use crate::error::{ErrorKind, HiveError};
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Registers sqlite-vec extension globally (once per process).
/// Must be called before any SQLite connections are opened.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
pub(crate) fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init matches the signature sqlite3_auto_extension
        // expects; the pointer is statically linked and lives for the process.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered globally");
    });
}

fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

fn is_hive_contention(err: &HiveError) -> bool {
    matches!(err.kind(), ErrorKind::Busy | ErrorKind::Locked)
}

fn is_sqlite_contention(err: &anyhow::Error) -> bool {
    if let Some(rusqlite_err) = err.downcast_ref::<rusqlite::Error>() {
        return is_rusqlite_contention(rusqlite_err);
    }
    if let Some(hive_err) = err.downcast_ref::<HiveError>() {
        return is_hive_contention(hive_err);
    }
    false
}

/// Retry delays for SQLite contention backoff: 100ms, 200ms, 400ms.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(200),
    Duration::from_millis(400),
];

/// Generic retry-with-backoff for async operations that may encounter SQLite contention.
async fn retry_with_backoff<F, Fut, R, E>(mut op: F, is_retryable: impl Fn(&E) -> bool) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
    E: std::fmt::Display,
{
    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match op().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if is_retryable(&e) {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}: {}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay,
                        e
                    );
                    tokio::time::sleep(*delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
    op().await
}

/// Write-ahead-log statistics, as returned by `getWalStats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalStats {
    pub wal_size_bytes: u64,
    pub wal_file_count: u32,
}

#[derive(Debug, Clone)]
pub struct WalHealth {
    pub healthy: bool,
    pub message: String,
}

/// Database pool wrapper with sqlite-vec support and per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    memory_uri: Option<String>,
    wal_threshold_mb: u64,
}

enum DbStorage {
    File(PathBuf),
    InMemory,
}

impl DatabasePool {
    /// Open a pooled database at the given path, running migrations on first use.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf()), 100).await
    }

    /// Open a pooled in-memory database with a shared-cache URI (for tests).
    ///
    /// The shared-cache URI lets every connection in the pool see the same
    /// in-memory database; without it each pooled connection would get its
    /// own isolated database.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory, 100).await
    }

    async fn open_internal(storage: DbStorage, wal_threshold_mb: u64) -> Result<Self> {
        ensure_sqlite_vec_registered();

        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = p.to_string_lossy().to_string();
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), None, hook)
            }
            DbStorage::InMemory => {
                let uri = format!("file:memdb_{:?}?mode=memory&cache=shared", uuid::Uuid::new_v4());
                let hook = make_memory_post_create_hook();
                (uri.clone(), None, Some(uri), hook)
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
            wal_threshold_mb,
        };

        if let Some(ref db_path) = db_pool.path
            && let Err(e) = Self::backup_before_migration(db_path)
        {
            tracing::warn!("Pre-migration backup failed (continuing anyway): {}", e);
        }

        db_pool.run_migrations().await?;
        db_pool.checkpoint().await?;

        Ok(db_pool)
    }

    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool (blocking thread pool).
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.pool.get().await.context("Failed to get connection from pool")?;
        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure that returns `Result<_, HiveError>` directly.
    pub async fn run<F, R, E>(&self, f: F) -> std::result::Result<R, HiveError>
    where
        F: FnOnce(&Connection) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<HiveError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| HiveError::Other(format!("Failed to get connection: {e}")))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| HiveError::Other(format!("Database error: {e}")))?
    }

    /// Like [`run`](Self::run), retrying on SQLITE_BUSY/SQLITE_LOCKED (100/200/400ms).
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> std::result::Result<R, HiveError>
    where
        F: FnOnce(&Connection) -> std::result::Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<HiveError> + Send + 'static,
    {
        retry_with_backoff(|| self.run(f.clone()), is_hive_contention).await
    }

    /// Like [`interact`](Self::interact), retrying on SQLite contention.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        retry_with_backoff(|| self.interact(f.clone()), |e: &anyhow::Error| is_sqlite_contention(e)).await
    }

    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            super::schema::run_all_migrations(conn)?;
            if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                tracing::debug!("PRAGMA optimize skipped: {}", e);
            }
            Ok(())
        })
        .await
    }

    /// `checkpoint()`: flush the WAL into the main database file. Called after
    /// every migration batch and after `reset_database`.
    pub async fn checkpoint(&self) -> Result<()> {
        self.interact(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")
                .context("wal checkpoint failed")
        })
        .await
    }

    /// `getWalStats()`: WAL side-file size and page count, 0 for in-memory databases.
    pub async fn wal_stats(&self) -> Result<WalStats> {
        let Some(path) = self.path.clone() else {
            return Ok(WalStats::default());
        };
        let wal_path = path.with_extension(match path.extension() {
            Some(ext) => format!("{}-wal", ext.to_string_lossy()),
            None => "db-wal".to_string(),
        });
        let wal_size_bytes = tokio::fs::metadata(&wal_path).await.map(|m| m.len()).unwrap_or(0);
        Ok(WalStats {
            wal_size_bytes,
            wal_file_count: u32::from(wal_size_bytes > 0),
        })
    }

    /// `checkWalHealth(threshold_mb)`: warn (never error) when the WAL file has bloated.
    pub async fn check_wal_health(&self) -> Result<WalHealth> {
        let stats = self.wal_stats().await?;
        let threshold_bytes = self.wal_threshold_mb * 1024 * 1024;
        if stats.wal_size_bytes > threshold_bytes {
            Ok(WalHealth {
                healthy: false,
                message: format!(
                    "WAL file is {} MB, exceeding the {} MB threshold; consider a checkpoint",
                    stats.wal_size_bytes / (1024 * 1024),
                    self.wal_threshold_mb
                ),
            })
        } else {
            Ok(WalHealth {
                healthy: true,
                message: "WAL size within threshold".to_string(),
            })
        }
    }

    /// Administrative reset: truncate all data tables and checkpoint. Never
    /// called from request-handling paths.
    pub async fn reset_database(&self) -> Result<()> {
        self.interact(|conn| {
            conn.execute_batch(
                "DELETE FROM events;
                 DELETE FROM beads;
                 DELETE FROM bead_dependencies;
                 DELETE FROM blocked_beads_cache;
                 DELETE FROM bead_labels;
                 DELETE FROM bead_comments;
                 DELETE FROM agents;
                 DELETE FROM messages;
                 DELETE FROM reservations;
                 DELETE FROM decision_traces;
                 DELETE FROM memories;
                 DELETE FROM memory_embeddings;
                 DELETE FROM session_index_state;",
            )
            .context("reset_database failed")
        })
        .await?;
        self.checkpoint().await
    }

    fn backup_before_migration(path: &Path) -> Result<()> {
        use std::fs;

        if !path.exists() {
            return Ok(());
        }

        let backup_path = path.with_extension("db.pre-migration");
        let conn = rusqlite::Connection::open(path).context("Failed to open DB for backup")?;
        let _ = fs::remove_file(&backup_path);
        conn.execute("VACUUM INTO ?1", [backup_path.to_string_lossy().as_ref()])
            .context("Failed to create pre-migration backup")?;
        tracing::info!("Created pre-migration backup: {}", backup_path.display());
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;
                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_in_memory_roundtrip() {
        let pool = DatabasePool::open_in_memory().await.expect("open pool");
        let id = pool
            .interact(|conn| {
                conn.execute(
                    "INSERT INTO events (type, project_key, timestamp, sequence, data) VALUES (?, ?, ?, ?, ?)",
                    rusqlite::params!["bead_created", "/repo", 0i64, 1i64, "{}"],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .expect("insert");
        assert!(id > 0);
    }

    #[tokio::test]
    async fn test_checkpoint_on_in_memory_is_noop_safe() {
        let pool = DatabasePool::open_in_memory().await.expect("open pool");
        pool.checkpoint().await.expect("checkpoint should not fail");
    }

    #[tokio::test]
    async fn test_wal_stats_empty_for_in_memory() {
        let pool = DatabasePool::open_in_memory().await.expect("open pool");
        let stats = pool.wal_stats().await.expect("wal stats");
        assert_eq!(stats.wal_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_interact_with_retry_succeeds_first_try() {
        let pool = DatabasePool::open_in_memory().await.expect("open pool");
        let result = pool
            .interact_with_retry(|conn| {
                conn.execute("INSERT INTO agents (project_key, name) VALUES (?, ?)", rusqlite::params!["/repo", "a1"])?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .expect("retry should succeed");
        assert!(result > 0);
    }

    #[tokio::test]
    async fn test_interact_with_retry_non_busy_error_fails_fast() {
        let pool = DatabasePool::open_in_memory().await.expect("open pool");
        let result = pool
            .interact_with_retry(|conn| {
                conn.execute("INSERT INTO nonexistent_table VALUES (?)", rusqlite::params![1])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_backup_before_migration_skips_nonexistent_db() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nonexistent.db");
        DatabasePool::backup_before_migration(&db_path).expect("should succeed for nonexistent db");
        assert!(!db_path.with_extension("db.pre-migration").exists());
    }

    #[test]
    fn test_is_rusqlite_contention_busy() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                extended_code: 5,
            },
            None,
        );
        assert!(is_rusqlite_contention(&err));
    }

    #[test]
    fn test_is_rusqlite_contention_other_error() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                extended_code: 19,
            },
            None,
        );
        assert!(!is_rusqlite_contention(&err));
    }
}
