// db/schema/mod.rs
// Database schema and versioned migrations.

use anyhow::{Context, Result, bail};
use rusqlite::Connection;

mod fts;
mod vectors;

pub use fts::rebuild_memories_fts;

/// One numbered, monotonic migration. Migrations never change once released;
/// a schema change ships as a new entry appended to `MIGRATIONS`.
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "event log",
        sql: r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    project_key TEXT NOT NULL,
    timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    sequence INTEGER NOT NULL,
    data TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_project_sequence ON events(project_key, sequence);
CREATE INDEX IF NOT EXISTS idx_events_project_type ON events(project_key, type);
"#,
    },
    Migration {
        version: 2,
        description: "bead projections: work items, dependencies, labels, comments, dirty tracking",
        sql: r#"
CREATE TABLE IF NOT EXISTS beads (
    id TEXT PRIMARY KEY,
    project_key TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    issue_type TEXT NOT NULL DEFAULT 'task',
    priority INTEGER NOT NULL DEFAULT 2,
    status TEXT NOT NULL DEFAULT 'open',
    parent_id TEXT REFERENCES beads(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    closed_at TEXT,
    deleted_at TEXT,
    content_hash TEXT NOT NULL,
    files_touched TEXT,
    agent_name TEXT,
    agent_model TEXT
);
CREATE INDEX IF NOT EXISTS idx_beads_project_status ON beads(project_key, status);
CREATE INDEX IF NOT EXISTS idx_beads_parent ON beads(parent_id);

CREATE TABLE IF NOT EXISTS bead_dependencies (
    bead_id TEXT NOT NULL REFERENCES beads(id),
    depends_on_id TEXT NOT NULL REFERENCES beads(id),
    relationship TEXT NOT NULL DEFAULT 'blocks',
    created_at TEXT NOT NULL,
    PRIMARY KEY (bead_id, depends_on_id, relationship)
);
CREATE INDEX IF NOT EXISTS idx_deps_depends_on ON bead_dependencies(depends_on_id);

CREATE TABLE IF NOT EXISTS blocked_beads_cache (
    bead_id TEXT PRIMARY KEY REFERENCES beads(id),
    blocker_ids TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bead_labels (
    bead_id TEXT NOT NULL REFERENCES beads(id),
    label TEXT NOT NULL,
    PRIMARY KEY (bead_id, label)
);

CREATE TABLE IF NOT EXISTS bead_comments (
    id TEXT PRIMARY KEY,
    bead_id TEXT NOT NULL REFERENCES beads(id),
    author TEXT NOT NULL,
    body TEXT NOT NULL,
    parent_comment_id TEXT REFERENCES bead_comments(id),
    created_at TEXT NOT NULL,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_comments_bead ON bead_comments(bead_id);

-- Beads with projection state not yet reflected in issues.jsonl. The flush
-- manager exports and clears these instead of re-exporting the whole project.
CREATE TABLE IF NOT EXISTS bead_dirty (
    bead_id TEXT PRIMARY KEY REFERENCES beads(id),
    marked_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 3,
        description: "agents, messages, reservations",
        sql: r#"
CREATE TABLE IF NOT EXISTS agents (
    project_key TEXT NOT NULL,
    name TEXT NOT NULL,
    program TEXT,
    model TEXT,
    registered_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    last_seen_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (project_key, name)
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    project_key TEXT NOT NULL,
    sender TEXT NOT NULL,
    recipients TEXT NOT NULL,
    subject TEXT,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    read_by TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project_key, created_at DESC);

CREATE TABLE IF NOT EXISTS reservations (
    project_key TEXT NOT NULL,
    agent TEXT NOT NULL,
    file_glob TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    PRIMARY KEY (project_key, agent, file_glob)
);
CREATE INDEX IF NOT EXISTS idx_reservations_expiry ON reservations(expires_at);
"#,
    },
    Migration {
        version: 4,
        description: "decision traces",
        sql: r#"
CREATE TABLE IF NOT EXISTS decision_traces (
    id TEXT PRIMARY KEY,
    decision_type TEXT NOT NULL,
    epic_id TEXT,
    bead_id TEXT REFERENCES beads(id),
    agent_name TEXT NOT NULL,
    project_key TEXT NOT NULL,
    decision TEXT NOT NULL,
    rationale TEXT,
    inputs_gathered TEXT,
    policy_evaluated TEXT,
    alternatives TEXT,
    precedent_cited TEXT,
    outcome_event_id INTEGER REFERENCES events(id),
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_bead ON decision_traces(bead_id);
CREATE INDEX IF NOT EXISTS idx_decisions_project ON decision_traces(project_key, timestamp DESC);
"#,
    },
    Migration {
        version: 5,
        description: "semantic memory: memories and the memory_embeddings vector table",
        sql: r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    metadata TEXT,
    collection TEXT NOT NULL DEFAULT 'default',
    created_at TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    tags TEXT NOT NULL DEFAULT '[]',
    agent_type TEXT,
    session_id TEXT,
    message_role TEXT,
    message_idx INTEGER,
    source_path TEXT
);
CREATE INDEX IF NOT EXISTS idx_memories_collection ON memories(collection, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id);
CREATE INDEX IF NOT EXISTS idx_memories_source ON memories(source_path);

CREATE VIRTUAL TABLE IF NOT EXISTS memory_embeddings USING vec0(
    embedding float[1024],
    +memory_id TEXT
);
"#,
    },
    Migration {
        version: 6,
        description: "session index staleness state",
        sql: r#"
CREATE TABLE IF NOT EXISTS session_index_state (
    source_path TEXT PRIMARY KEY,
    last_indexed_at TEXT NOT NULL,
    file_mtime TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0
);
"#,
    },
];

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .context("failed to create schema_version table")
}

fn current_version(conn: &Connection) -> Result<i64> {
    ensure_version_table(conn)?;
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
        .context("failed to read schema_version")
}

/// Apply one migration in its own transaction, record it in `schema_version`,
/// then checkpoint the WAL so a crash between migrations never leaves an
/// oversized WAL behind.
fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE;").context("failed to begin migration transaction")?;
    let applied = (|| -> Result<()> {
        conn.execute_batch(migration.sql)
            .with_context(|| format!("migration {} ({}) failed", migration.version, migration.description))?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            [migration.version],
        )
        .context("failed to record schema_version row")?;
        Ok(())
    })();

    match applied {
        Ok(()) => conn.execute_batch("COMMIT;").context("failed to commit migration")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(e);
        }
    }

    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);").context("checkpoint after migration failed")?;
    Ok(())
}

/// Apply every migration newer than the database's current version, in
/// version order, each in its own transaction with a checkpoint after.
/// Refuses to start against a database whose recorded version is newer than
/// anything this binary knows how to run -- an older binary against a newer
/// schema is an operator error, not a silent downgrade.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    let applied = current_version(conn)?;
    let latest = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);
    if applied > latest {
        bail!(
            "database schema is at version {applied}, newer than version {latest} this binary supports; refusing to start against a newer schema"
        );
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        tracing::info!(version = migration.version, description = migration.description, "applying migration");
        apply_migration(conn, migration)?;
    }

    vectors::migrate_vec_tables(conn)?;
    fts::migrate_memories_fts(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::ensure_sqlite_vec_registered;

    #[test]
    fn fresh_database_ends_up_at_latest_version() {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        let version: i64 = conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[test]
    fn migrations_are_idempotent_across_repeated_runs() {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        run_all_migrations(&conn).unwrap();
        let applied: i64 = conn.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0)).unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }

    #[test]
    fn refuses_to_run_against_a_newer_schema() {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            [MIGRATIONS.last().unwrap().version + 1],
        )
        .unwrap();
        let err = run_all_migrations(&conn).unwrap_err();
        assert!(err.to_string().contains("newer than"));
    }
}
