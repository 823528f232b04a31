// db/schema/fts.rs
// Full-text search (FTS5) over memory content, used by fts_search/find.

use anyhow::Result;
use rusqlite::Connection;

pub fn migrate_memories_fts(conn: &Connection) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='memories_fts'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);

    if !exists {
        tracing::info!("Creating FTS5 index for memories");
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                content,
                memory_id UNINDEXED,
                content='',
                tokenize='porter unicode61 remove_diacritics 1'
            );",
        )?;
        rebuild_memories_fts(conn)?;
    }

    Ok(())
}

/// Rebuild the memories FTS index from `memories`. Safe to call at any time;
/// `store`/`remove` keep it in sync incrementally so this is only needed
/// after a bulk import.
pub fn rebuild_memories_fts(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM memories_fts", [])?;
    let inserted = conn.execute(
        "INSERT INTO memories_fts(rowid, content, memory_id)
         SELECT rowid, content, id FROM memories",
        [],
    )?;
    tracing::info!("Rebuilt memories FTS index with {} entries", inserted);
    Ok(())
}
