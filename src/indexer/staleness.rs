// src/indexer/staleness.rs
// Tracks the last-indexed mtime per session file in `session_index_state` so
// the watcher doesn't re-embed a file it has already processed.

use crate::error::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;

pub const STALENESS_THRESHOLD_SECS: i64 = 300;

pub fn record_indexed(conn: &Connection, path: &str, mtime: i64, message_count: i64) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO session_index_state (source_path, last_indexed_at, file_mtime, message_count)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(source_path) DO UPDATE SET
            last_indexed_at = excluded.last_indexed_at,
            file_mtime = excluded.file_mtime,
            message_count = excluded.message_count",
        params![path, now, mtime, message_count],
    )?;
    Ok(())
}

/// Stale iff never indexed, or the current mtime has advanced by more than
/// the staleness threshold since the recorded mtime.
pub fn check(conn: &Connection, path: &str, current_mtime: i64) -> Result<bool> {
    let recorded: Option<i64> =
        conn.query_row("SELECT file_mtime FROM session_index_state WHERE source_path = ?1", params![path], |r| r.get(0))
            .optional()?;
    Ok(match recorded {
        None => true,
        Some(file_mtime) => current_mtime - file_mtime > STALENESS_THRESHOLD_SECS,
    })
}

/// Bulk variant: one `IN` query for all paths, absent rows treated as stale.
pub fn check_bulk(conn: &Connection, items: &[(String, i64)]) -> Result<HashMap<String, bool>> {
    if items.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = items.iter().enumerate().map(|(i, _)| format!("?{}", i + 1)).collect::<Vec<_>>().join(",");
    let sql = format!("SELECT source_path, file_mtime FROM session_index_state WHERE source_path IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::ToSql> = items.iter().map(|(p, _)| p as &dyn rusqlite::ToSql).collect();
    let recorded: HashMap<String, i64> = stmt
        .query_map(params_vec.as_slice(), |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;

    Ok(items
        .iter()
        .map(|(path, current_mtime)| {
            let stale = match recorded.get(path) {
                None => true,
                Some(file_mtime) => current_mtime - file_mtime > STALENESS_THRESHOLD_SECS,
            };
            (path.clone(), stale)
        })
        .collect())
}
