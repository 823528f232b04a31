// db/schema/vectors.rs
// Vector table migrations for the memory_embeddings vec0 table

use anyhow::Result;
use rusqlite::Connection;

const MEMORY_EMBEDDING_DIM: i64 = 1024;

/// Drop and recreate `memory_embeddings` if its dimension doesn't match the
/// configured embedding size. sqlite-vec can't ALTER a vec0 table's column
/// width in place.
pub fn migrate_vec_tables(conn: &Connection) -> Result<()> {
    let current_dim: Option<i64> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name='memory_embeddings'",
            [],
            |row| {
                let sql: String = row.get(0)?;
                if let Some(start) = sql.find("float[") {
                    let rest = &sql[start + 6..];
                    if let Some(end) = rest.find(']')
                        && let Ok(dim) = rest[..end].parse::<i64>()
                    {
                        return Ok(Some(dim));
                    }
                }
                Ok(None)
            },
        )
        .unwrap_or(None);

    if let Some(dim) = current_dim
        && dim != MEMORY_EMBEDDING_DIM
    {
        tracing::warn!(
            "memory_embeddings dimension changed from {} to {}; dropping stored vectors",
            dim,
            MEMORY_EMBEDDING_DIM
        );
        conn.execute_batch(
            "DROP TABLE IF EXISTS memory_embeddings;
             CREATE VIRTUAL TABLE memory_embeddings USING vec0(
                 embedding float[1024],
                 +memory_id TEXT
             );",
        )?;
    }

    Ok(())
}
