// db/memory.rs
// Storage layer for the semantic memory store: raw SQL over `memories` /
// `memory_embeddings` / `memories_fts`. Embedding generation and the
// vector/FTS fallback policy live one level up in `crate::memory`.

use crate::error::{HiveError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub metadata: Option<Value>,
    pub collection: String,
    pub created_at: String,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub agent_type: Option<String>,
    pub session_id: Option<String>,
    pub message_role: Option<String>,
    pub message_idx: Option<i64>,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewMemory {
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

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let metadata_raw: Option<String> = row.get("metadata")?;
    let tags_raw: String = row.get("tags")?;
    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        metadata: metadata_raw.and_then(|s| serde_json::from_str(&s).ok()),
        collection: row.get("collection")?,
        created_at: row.get("created_at")?,
        confidence: row.get("confidence")?,
        tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
        agent_type: row.get("agent_type")?,
        session_id: row.get("session_id")?,
        message_role: row.get("message_role")?,
        message_idx: row.get("message_idx")?,
        source_path: row.get("source_path")?,
    })
}

/// Insert a memory plus (if given) its embedding, keeping `memories_fts` in sync.
pub fn store(conn: &Connection, id: &str, new: &NewMemory, embedding: Option<&[f32]>) -> Result<Memory> {
    let now = Utc::now().to_rfc3339();
    let metadata_str = new.metadata.as_ref().map(serde_json::to_string).transpose()?;
    let tags_str = serde_json::to_string(&new.tags)?;

    conn.execute(
        "INSERT INTO memories (id, content, metadata, collection, created_at, confidence, tags,
            agent_type, session_id, message_role, message_idx, source_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            new.content,
            metadata_str,
            new.collection,
            now,
            new.confidence,
            tags_str,
            new.agent_type,
            new.session_id,
            new.message_role,
            new.message_idx,
            new.source_path,
        ],
    )?;
    let rowid = conn.last_insert_rowid();

    conn.execute(
        "INSERT INTO memories_fts(rowid, content, memory_id) VALUES (?1, ?2, ?3)",
        params![rowid, new.content, id],
    )?;

    if let Some(embedding) = embedding {
        let blob = vec_to_blob(embedding);
        conn.execute(
            "INSERT INTO memory_embeddings(rowid, embedding, memory_id) VALUES (?1, ?2, ?3)",
            params![rowid, blob, id],
        )?;
    }

    get(conn, id)
}

pub fn get(conn: &Connection, id: &str) -> Result<Memory> {
    conn.query_row("SELECT * FROM memories WHERE id = ?1", params![id], row_to_memory)
        .optional()?
        .ok_or_else(|| HiveError::NotFound(format!("memory {id}")))
}

pub fn remove(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    conn.execute("DELETE FROM memories_fts WHERE memory_id = ?1", params![id])?;
    conn.execute("DELETE FROM memory_embeddings WHERE memory_id = ?1", params![id])?;
    Ok(())
}

/// Reset `created_at` to now, promoting a validated memory to the front of
/// recency-ordered results.
pub fn validate(conn: &Connection, id: &str) -> Result<Memory> {
    let now = Utc::now().to_rfc3339();
    conn.execute("UPDATE memories SET created_at = ?1 WHERE id = ?2", params![now, id])?;
    get(conn, id)
}

pub fn list(conn: &Connection, collection: Option<&str>, limit: i64) -> Result<Vec<Memory>> {
    let rows = match collection {
        Some(c) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM memories WHERE collection = ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            stmt.query_map(params![c, limit], row_to_memory)?.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare("SELECT * FROM memories ORDER BY created_at DESC LIMIT ?1")?;
            stmt.query_map(params![limit], row_to_memory)?.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(rows)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f64,
}

/// ANN search over `memory_embeddings`, scored as `1 - cosine_distance`.
pub fn vector_search(conn: &Connection, embedding: &[f32], limit: i64, threshold: f64) -> Result<Vec<ScoredMemory>> {
    let blob = vec_to_blob(embedding);
    let mut stmt = conn.prepare(
        "SELECT m.*, (1.0 - e.distance) AS score
         FROM memory_embeddings e
         JOIN memories m ON m.id = e.memory_id
         WHERE e.embedding MATCH ?1 AND k = ?2
         ORDER BY e.distance ASC",
    )?;
    let rows: Vec<(Memory, f64)> = stmt
        .query_map(params![blob, limit], |row| {
            let score: f64 = row.get("score")?;
            Ok((row_to_memory(row)?, score))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .filter(|(_, score)| *score >= threshold)
        .map(|(memory, score)| ScoredMemory { memory, score })
        .collect())
}

/// BM25-like keyword search via FTS5, scored by `bm25()` inverted to `0..1`-ish (lower is better natively; we negate).
pub fn fts_search(conn: &Connection, query: &str, limit: i64) -> Result<Vec<ScoredMemory>> {
    let mut stmt = conn.prepare(
        "SELECT m.*, bm25(memories_fts) AS rank
         FROM memories_fts
         JOIN memories m ON m.id = memories_fts.memory_id
         WHERE memories_fts MATCH ?1
         ORDER BY rank ASC
         LIMIT ?2",
    )?;
    let rows: Vec<(Memory, f64)> = stmt
        .query_map(params![query, limit], |row| {
            let rank: f64 = row.get("rank")?;
            Ok((row_to_memory(row)?, rank))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .map(|(memory, rank)| ScoredMemory {
            memory,
            score: 1.0 / (1.0 + rank.max(0.0)),
        })
        .collect())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub total: i64,
    pub with_embedding: i64,
    pub collections: Vec<String>,
}

pub fn stats(conn: &Connection) -> Result<MemoryStats> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
    let with_embedding: i64 = conn.query_row("SELECT COUNT(*) FROM memory_embeddings", [], |r| r.get(0))?;
    let mut stmt = conn.prepare("SELECT DISTINCT collection FROM memories ORDER BY collection")?;
    let collections = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(MemoryStats { total, with_embedding, collections })
}

/// Cheap consistency check: row counts should line up across `memories` and
/// its FTS shadow table. Returns a human message.
pub fn check_health(conn: &Connection) -> Result<String> {
    let memories_count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
    let fts_count: i64 = conn.query_row("SELECT COUNT(*) FROM memories_fts", [], |r| r.get(0))?;
    if memories_count != fts_count {
        Ok(format!(
            "memories/memories_fts row count mismatch: {memories_count} vs {fts_count}; consider rebuild_memories_fts"
        ))
    } else {
        Ok("ok".to_string())
    }
}

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    fn sample(content: &str) -> NewMemory {
        NewMemory {
            content: content.to_string(),
            collection: "default".to_string(),
            confidence: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn store_and_get_roundtrip() {
        let conn = setup_test_connection();
        store(&conn, "mem-1", &sample("hello world"), None).unwrap();
        let mem = get(&conn, "mem-1").unwrap();
        assert_eq!(mem.content, "hello world");
    }

    #[test]
    fn fts_search_finds_stored_content() {
        let conn = setup_test_connection();
        store(&conn, "mem-1", &sample("the quick brown fox jumps"), None).unwrap();
        store(&conn, "mem-2", &sample("totally unrelated text"), None).unwrap();
        let results = fts_search(&conn, "fox", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, "mem-1");
    }

    #[test]
    fn vector_search_respects_threshold() {
        let conn = setup_test_connection();
        store(&conn, "mem-1", &sample("a"), Some(&[1.0, 0.0, 0.0])).unwrap();
        store(&conn, "mem-2", &sample("b"), Some(&[0.0, 1.0, 0.0])).unwrap();
        let results = vector_search(&conn, &[1.0, 0.0, 0.0], 10, 0.9).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, "mem-1");
    }

    #[test]
    fn remove_deletes_from_all_tables() {
        let conn = setup_test_connection();
        store(&conn, "mem-1", &sample("x"), Some(&[1.0, 0.0, 0.0])).unwrap();
        remove(&conn, "mem-1").unwrap();
        assert!(get(&conn, "mem-1").is_err());
        let health = check_health(&conn).unwrap();
        assert_eq!(health, "ok");
    }
}
