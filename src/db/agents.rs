// db/agents.rs
// Agent registry, inter-agent messages, and file-glob reservations.

use crate::error::Result;
use chrono::Utc;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub project_key: String,
    pub name: String,
    pub program: Option<String>,
    pub model: Option<String>,
    pub registered_at: String,
    pub last_seen_at: String,
}

/// Register an agent, or refresh `last_seen_at` if it's already known.
pub fn register(conn: &Connection, project_key: &str, name: &str, program: Option<&str>, model: Option<&str>) -> Result<Agent> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO agents (project_key, name, program, model, registered_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(project_key, name) DO UPDATE SET last_seen_at = ?5, program = ?3, model = ?4",
        params![project_key, name, program, model, now],
    )?;
    conn.query_row(
        "SELECT project_key, name, program, model, registered_at, last_seen_at FROM agents WHERE project_key = ?1 AND name = ?2",
        params![project_key, name],
        |row| {
            Ok(Agent {
                project_key: row.get(0)?,
                name: row.get(1)?,
                program: row.get(2)?,
                model: row.get(3)?,
                registered_at: row.get(4)?,
                last_seen_at: row.get(5)?,
            })
        },
    )
    .map_err(Into::into)
}

pub fn list(conn: &Connection, project_key: &str) -> Result<Vec<Agent>> {
    let mut stmt = conn.prepare(
        "SELECT project_key, name, program, model, registered_at, last_seen_at FROM agents
         WHERE project_key = ?1 ORDER BY last_seen_at DESC",
    )?;
    let rows = stmt
        .query_map(params![project_key], |row| {
            Ok(Agent {
                project_key: row.get(0)?,
                name: row.get(1)?,
                program: row.get(2)?,
                model: row.get(3)?,
                registered_at: row.get(4)?,
                last_seen_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub project_key: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: Option<String>,
    pub body: String,
    pub created_at: String,
    pub read_by: Vec<String>,
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let recipients_raw: String = row.get("recipients")?;
    let read_by_raw: String = row.get("read_by")?;
    Ok(Message {
        id: row.get("id")?,
        project_key: row.get("project_key")?,
        sender: row.get("sender")?,
        recipients: serde_json::from_str(&recipients_raw).unwrap_or_default(),
        subject: row.get("subject")?,
        body: row.get("body")?,
        created_at: row.get("created_at")?,
        read_by: serde_json::from_str(&read_by_raw).unwrap_or_default(),
    })
}

pub fn send_message(
    conn: &Connection,
    project_key: &str,
    sender: &str,
    recipients: &[String],
    subject: Option<&str>,
    body: &str,
) -> Result<Message> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let recipients_json = serde_json::to_string(recipients)?;

    super::events::append_event(
        conn,
        project_key,
        "message_sent",
        &serde_json::json!({"id": id, "sender": sender, "recipients": recipients, "subject": subject, "body": body}),
    )?;

    conn.execute(
        "INSERT INTO messages (id, project_key, sender, recipients, subject, body, created_at, read_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '[]')",
        params![id, project_key, sender, recipients_json, subject, body, now],
    )?;

    Ok(Message {
        id,
        project_key: project_key.to_string(),
        sender: sender.to_string(),
        recipients: recipients.to_vec(),
        subject: subject.map(String::from),
        body: body.to_string(),
        created_at: now,
        read_by: vec![],
    })
}

/// Messages addressed to `agent`, newest first.
pub fn inbox(conn: &Connection, project_key: &str, agent: &str, unread_only: bool) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, project_key, sender, recipients, subject, body, created_at, read_by
         FROM messages WHERE project_key = ?1 ORDER BY created_at DESC",
    )?;
    let all = stmt
        .query_map(params![project_key], row_to_message)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(all
        .into_iter()
        .filter(|m| m.recipients.iter().any(|r| r == agent))
        .filter(|m| !unread_only || !m.read_by.iter().any(|r| r == agent))
        .collect())
}

pub fn mark_read(conn: &Connection, message_id: &str, agent: &str) -> Result<()> {
    let read_by_raw: String = conn.query_row(
        "SELECT read_by FROM messages WHERE id = ?1",
        params![message_id],
        |r| r.get(0),
    )?;
    let mut read_by: Vec<String> = serde_json::from_str(&read_by_raw).unwrap_or_default();
    if !read_by.iter().any(|r| r == agent) {
        read_by.push(agent.to_string());
    }
    conn.execute(
        "UPDATE messages SET read_by = ?1 WHERE id = ?2",
        params![serde_json::to_string(&read_by)?, message_id],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub project_key: String,
    pub agent: String,
    pub file_glob: String,
    pub acquired_at: String,
    pub expires_at: String,
}

/// Acquire a reservation on `file_glob` for `ttl_secs`. Overwrites any
/// existing reservation for the same `(project_key, agent, file_glob)` key;
/// callers should check [`active_reservations`] for conflicting globs first.
pub fn acquire(conn: &Connection, project_key: &str, agent: &str, file_glob: &str, ttl_secs: i64) -> Result<Reservation> {
    let now = Utc::now();
    let acquired_at = now.to_rfc3339();
    let expires_at = (now + chrono::Duration::seconds(ttl_secs)).to_rfc3339();

    conn.execute(
        "INSERT INTO reservations (project_key, agent, file_glob, acquired_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(project_key, agent, file_glob) DO UPDATE SET acquired_at = ?4, expires_at = ?5",
        params![project_key, agent, file_glob, acquired_at, expires_at],
    )?;
    Ok(Reservation {
        project_key: project_key.to_string(),
        agent: agent.to_string(),
        file_glob: file_glob.to_string(),
        acquired_at,
        expires_at,
    })
}

pub fn release(conn: &Connection, project_key: &str, agent: &str, file_glob: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM reservations WHERE project_key = ?1 AND agent = ?2 AND file_glob = ?3",
        params![project_key, agent, file_glob],
    )?;
    Ok(())
}

/// Reservations not yet expired, across all agents.
pub fn active_reservations(conn: &Connection, project_key: &str) -> Result<Vec<Reservation>> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT project_key, agent, file_glob, acquired_at, expires_at FROM reservations
         WHERE project_key = ?1 AND expires_at > ?2",
    )?;
    let rows = stmt
        .query_map(params![project_key, now], |row| {
            Ok(Reservation {
                project_key: row.get(0)?,
                agent: row.get(1)?,
                file_glob: row.get(2)?,
                acquired_at: row.get(3)?,
                expires_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    #[test]
    fn register_is_idempotent_and_refreshes_last_seen() {
        let conn = setup_test_connection();
        register(&conn, "/repo", "agent-1", Some("claude"), Some("sonnet")).unwrap();
        let agent = register(&conn, "/repo", "agent-1", Some("claude"), Some("opus")).unwrap();
        assert_eq!(agent.model, Some("opus".to_string()));
        assert_eq!(list(&conn, "/repo").unwrap().len(), 1);
    }

    #[test]
    fn inbox_filters_to_recipient_and_unread() {
        let conn = setup_test_connection();
        let msg = send_message(&conn, "/repo", "a1", &["a2".to_string()], Some("hi"), "body").unwrap();
        assert_eq!(inbox(&conn, "/repo", "a2", true).unwrap().len(), 1);
        mark_read(&conn, &msg.id, "a2").unwrap();
        assert_eq!(inbox(&conn, "/repo", "a2", true).unwrap().len(), 0);
        assert_eq!(inbox(&conn, "/repo", "a2", false).unwrap().len(), 1);
    }

    #[test]
    fn expired_reservation_is_excluded() {
        let conn = setup_test_connection();
        acquire(&conn, "/repo", "a1", "src/**", -1).unwrap();
        assert!(active_reservations(&conn, "/repo").unwrap().is_empty());
        acquire(&conn, "/repo", "a1", "src/**", 600).unwrap();
        assert_eq!(active_reservations(&conn, "/repo").unwrap().len(), 1);
    }
}
