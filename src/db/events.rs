// db/events.rs
// Append-only event log. Every projection (beads, dependencies, agents,
// messages, decisions) is derived by folding these rows; the log itself is
// never mutated or deleted except by an explicit admin reset.

use crate::error::{HiveError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub project_key: String,
    pub timestamp: String,
    pub sequence: i64,
    pub data: Value,
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let data_raw: String = row.get("data")?;
    Ok(Event {
        id: row.get("id")?,
        event_type: row.get("type")?,
        project_key: row.get("project_key")?,
        timestamp: row.get("timestamp")?,
        sequence: row.get("sequence")?,
        data: serde_json::from_str(&data_raw).unwrap_or(Value::Null),
    })
}

/// Append an event, assigning the next per-project sequence number.
///
/// Sequence numbers are scoped to `project_key`, not global, so two projects
/// syncing independently never contend for the same counter.
pub fn append_event(conn: &Connection, project_key: &str, event_type: &str, data: &Value) -> Result<Event> {
    let next_sequence: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) + 1 FROM events WHERE project_key = ?1",
        params![project_key],
        |row| row.get(0),
    )?;
    let timestamp = Utc::now().to_rfc3339();
    let data_str = serde_json::to_string(data)?;

    conn.execute(
        "INSERT INTO events (type, project_key, timestamp, sequence, data) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![event_type, project_key, timestamp, next_sequence, data_str],
    )?;
    let id = conn.last_insert_rowid();

    Ok(Event {
        id,
        event_type: event_type.to_string(),
        project_key: project_key.to_string(),
        timestamp,
        sequence: next_sequence,
        data: data.clone(),
    })
}

/// Read events for a project in canonical `(project_key, sequence)` order,
/// optionally resuming after `after_sequence`.
pub fn read_events(conn: &Connection, project_key: &str, after_sequence: Option<i64>, limit: Option<i64>) -> Result<Vec<Event>> {
    let after = after_sequence.unwrap_or(0);
    let limit = limit.unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT id, type, project_key, timestamp, sequence, data FROM events
         WHERE project_key = ?1 AND sequence > ?2
         ORDER BY sequence ASC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![project_key, after, limit], row_to_event)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_event(conn: &Connection, id: i64) -> Result<Event> {
    conn.query_row(
        "SELECT id, type, project_key, timestamp, sequence, data FROM events WHERE id = ?1",
        params![id],
        row_to_event,
    )
    .optional()?
    .ok_or_else(|| HiveError::NotFound(format!("event {id}")))
}

pub fn latest_sequence(conn: &Connection, project_key: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) FROM events WHERE project_key = ?1",
        params![project_key],
        |row| row.get(0),
    )?)
}

/// Re-apply every event for a project through `apply`, in order. Used to
/// rebuild projections from scratch (e.g. after a merge or schema change).
pub fn replay<F>(conn: &Connection, project_key: &str, mut apply: F) -> Result<()>
where
    F: FnMut(&Connection, &Event) -> Result<()>,
{
    for event in read_events(conn, project_key, None, None)? {
        apply(conn, &event)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    #[test]
    fn sequence_numbers_are_per_project_and_monotonic() {
        let conn = setup_test_connection();
        let e1 = append_event(&conn, "/repo-a", "bead_created", &serde_json::json!({"id": "bd-1"})).unwrap();
        let e2 = append_event(&conn, "/repo-a", "bead_created", &serde_json::json!({"id": "bd-2"})).unwrap();
        let e3 = append_event(&conn, "/repo-b", "bead_created", &serde_json::json!({"id": "bd-1"})).unwrap();
        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
        assert_eq!(e3.sequence, 1, "separate project should restart its own sequence");
    }

    #[test]
    fn read_events_respects_after_sequence_and_order() {
        let conn = setup_test_connection();
        for i in 0..5 {
            append_event(&conn, "/repo", "note", &serde_json::json!({"n": i})).unwrap();
        }
        let events = read_events(&conn, "/repo", Some(2), None).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 3);
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn replay_applies_every_event_in_order() {
        let conn = setup_test_connection();
        append_event(&conn, "/repo", "a", &serde_json::json!(1)).unwrap();
        append_event(&conn, "/repo", "b", &serde_json::json!(2)).unwrap();
        let mut seen = Vec::new();
        replay(&conn, "/repo", |_, ev| {
            seen.push(ev.event_type.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }
}
