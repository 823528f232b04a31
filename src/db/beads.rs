// db/beads.rs
// Work-item ("bead") projection: derived from `bead_*` events in the log,
// queried directly as a materialized table. Labels and comments live here
// too since they're intrinsic bead metadata, not graph structure.

use crate::error::{HiveError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    Feature,
    Task,
    Epic,
    Chore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Blocked,
    Closed,
    Tombstone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub project_key: String,
    pub title: String,
    pub description: Option<String>,
    pub issue_type: String,
    pub priority: i64,
    pub status: String,
    pub parent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
    pub deleted_at: Option<String>,
    pub content_hash: String,
    pub files_touched: Option<String>,
    pub agent_name: Option<String>,
    pub agent_model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewBead {
    pub title: String,
    pub description: Option<String>,
    pub issue_type: IssueType,
    pub priority: i64,
    pub parent_id: Option<String>,
    pub files_touched: Option<String>,
    pub agent_name: Option<String>,
    pub agent_model: Option<String>,
}

impl Default for IssueType {
    fn default() -> Self {
        IssueType::Task
    }
}

fn content_hash(title: &str, description: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(description.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Mark `bead_id`'s projection as having state not yet reflected in
/// `issues.jsonl`. `get_dirty`/`clear_dirty` and the flush manager read this
/// instead of re-exporting the whole project on every write.
fn mark_dirty(conn: &Connection, bead_id: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO bead_dirty (bead_id, marked_at) VALUES (?1, ?2)
         ON CONFLICT(bead_id) DO UPDATE SET marked_at = ?2",
        params![bead_id, now],
    )?;
    Ok(())
}

/// Dirty bead ids for `project_key`, oldest-marked first.
pub fn get_dirty(conn: &Connection, project_key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT bead_dirty.bead_id FROM bead_dirty
         JOIN beads ON beads.id = bead_dirty.bead_id
         WHERE beads.project_key = ?1
         ORDER BY bead_dirty.marked_at ASC",
    )?;
    let rows = stmt.query_map(params![project_key], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Clear dirty marks, typically after a successful export.
pub fn clear_dirty(conn: &Connection, ids: &[String]) -> Result<()> {
    for id in ids {
        conn.execute("DELETE FROM bead_dirty WHERE bead_id = ?1", params![id])?;
    }
    Ok(())
}

fn row_to_bead(row: &rusqlite::Row) -> rusqlite::Result<Bead> {
    Ok(Bead {
        id: row.get("id")?,
        project_key: row.get("project_key")?,
        title: row.get("title")?,
        description: row.get("description")?,
        issue_type: row.get("issue_type")?,
        priority: row.get("priority")?,
        status: row.get("status")?,
        parent_id: row.get("parent_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        closed_at: row.get("closed_at")?,
        deleted_at: row.get("deleted_at")?,
        content_hash: row.get("content_hash")?,
        files_touched: row.get("files_touched")?,
        agent_name: row.get("agent_name")?,
        agent_model: row.get("agent_model")?,
    })
}

/// Create a bead: appends `bead_created` and materializes the projection row
/// in the same call (the caller is expected to run this inside a pool
/// transaction via `interact`).
pub fn create(conn: &Connection, project_key: &str, id: &str, new: &NewBead) -> Result<Bead> {
    let now = Utc::now().to_rfc3339();
    let hash = content_hash(&new.title, new.description.as_deref());

    let data = serde_json::json!({
        "id": id,
        "title": new.title,
        "description": new.description,
        "issue_type": new.issue_type.to_string(),
        "priority": new.priority,
        "parent_id": new.parent_id,
        "files_touched": new.files_touched,
        "agent_name": new.agent_name,
        "agent_model": new.agent_model,
    });
    super::events::append_event(conn, project_key, "bead_created", &data)?;

    conn.execute(
        "INSERT INTO beads (id, project_key, title, description, issue_type, priority, status,
            parent_id, created_at, updated_at, content_hash, files_touched, agent_name, agent_model)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'open', ?7, ?8, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            project_key,
            new.title,
            new.description,
            new.issue_type.to_string(),
            new.priority,
            new.parent_id,
            now,
            hash,
            new.files_touched,
            new.agent_name,
            new.agent_model,
        ],
    )?;
    mark_dirty(conn, id)?;

    get(conn, id)
}

pub fn get(conn: &Connection, id: &str) -> Result<Bead> {
    conn.query_row("SELECT * FROM beads WHERE id = ?1", params![id], row_to_bead)
        .optional()?
        .ok_or_else(|| HiveError::NotFound(format!("bead {id}")))
}

#[derive(Debug, Clone, Default)]
pub struct BeadQuery {
    pub project_key: String,
    pub status: Option<Status>,
    pub issue_type: Option<IssueType>,
    pub parent_id: Option<String>,
    pub label: Option<String>,
    pub include_deleted: bool,
}

pub fn query(conn: &Connection, q: &BeadQuery) -> Result<Vec<Bead>> {
    let mut sql = String::from("SELECT beads.* FROM beads");
    let mut conds = vec!["beads.project_key = ?1".to_string()];
    let mut idx = 2;
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(q.project_key.clone())];

    if let Some(label) = &q.label {
        sql.push_str(" JOIN bead_labels ON bead_labels.bead_id = beads.id");
        conds.push(format!("bead_labels.label = ?{idx}"));
        params_vec.push(Box::new(label.clone()));
        idx += 1;
    }
    if let Some(status) = q.status {
        conds.push(format!("beads.status = ?{idx}"));
        params_vec.push(Box::new(status.to_string()));
        idx += 1;
    }
    if let Some(issue_type) = q.issue_type {
        conds.push(format!("beads.issue_type = ?{idx}"));
        params_vec.push(Box::new(issue_type.to_string()));
        idx += 1;
    }
    if let Some(parent_id) = &q.parent_id {
        conds.push(format!("beads.parent_id = ?{idx}"));
        params_vec.push(Box::new(parent_id.clone()));
        idx += 1;
    }
    if !q.include_deleted {
        conds.push("beads.deleted_at IS NULL".to_string());
    }
    let _ = idx;

    sql.push_str(" WHERE ");
    sql.push_str(&conds.join(" AND "));
    sql.push_str(" ORDER BY beads.priority ASC, beads.created_at ASC");

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), row_to_bead)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Update mutable fields and bump `updated_at`/`content_hash`.
pub fn update(
    conn: &Connection,
    project_key: &str,
    id: &str,
    title: Option<&str>,
    description: Option<&str>,
    priority: Option<i64>,
) -> Result<Bead> {
    let existing = get(conn, id)?;
    let now = Utc::now().to_rfc3339();
    let new_title = title.unwrap_or(&existing.title);
    let new_description = description.or(existing.description.as_deref());
    let new_priority = priority.unwrap_or(existing.priority);
    let hash = content_hash(new_title, new_description);

    super::events::append_event(
        conn,
        project_key,
        "bead_updated",
        &serde_json::json!({"id": id, "title": new_title, "description": new_description, "priority": new_priority}),
    )?;

    conn.execute(
        "UPDATE beads SET title = ?1, description = ?2, priority = ?3, updated_at = ?4, content_hash = ?5 WHERE id = ?6",
        params![new_title, new_description, new_priority, now, hash, id],
    )?;
    mark_dirty(conn, id)?;
    get(conn, id)
}

/// Transition status. Closing (`Closed`/`Tombstone`) stamps `closed_at`/`deleted_at`
/// and emits `bead_closed` in addition to `bead_status_changed`.
pub fn set_status(conn: &Connection, project_key: &str, id: &str, status: Status) -> Result<Bead> {
    let now = Utc::now().to_rfc3339();
    super::events::append_event(
        conn,
        project_key,
        "bead_status_changed",
        &serde_json::json!({"id": id, "status": status.to_string()}),
    )?;

    match status {
        Status::Closed => {
            conn.execute(
                "UPDATE beads SET status = ?1, updated_at = ?2, closed_at = ?2 WHERE id = ?3",
                params![status.to_string(), now, id],
            )?;
            super::events::append_event(conn, project_key, "bead_closed", &serde_json::json!({"id": id}))?;
        }
        Status::Tombstone => {
            conn.execute(
                "UPDATE beads SET status = ?1, updated_at = ?2, deleted_at = ?2 WHERE id = ?3",
                params![status.to_string(), now, id],
            )?;
        }
        _ => {
            conn.execute(
                "UPDATE beads SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.to_string(), now, id],
            )?;
        }
    }
    super::graph::invalidate_blocked_cache(conn, id)?;
    mark_dirty(conn, id)?;
    get(conn, id)
}

pub fn add_label(conn: &Connection, project_key: &str, bead_id: &str, label: &str) -> Result<()> {
    super::events::append_event(
        conn,
        project_key,
        "label_added",
        &serde_json::json!({"bead_id": bead_id, "label": label}),
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO bead_labels (bead_id, label) VALUES (?1, ?2)",
        params![bead_id, label],
    )?;
    mark_dirty(conn, bead_id)?;
    Ok(())
}

pub fn remove_label(conn: &Connection, project_key: &str, bead_id: &str, label: &str) -> Result<()> {
    super::events::append_event(
        conn,
        project_key,
        "label_removed",
        &serde_json::json!({"bead_id": bead_id, "label": label}),
    )?;
    conn.execute(
        "DELETE FROM bead_labels WHERE bead_id = ?1 AND label = ?2",
        params![bead_id, label],
    )?;
    mark_dirty(conn, bead_id)?;
    Ok(())
}

pub fn get_labels(conn: &Connection, bead_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT label FROM bead_labels WHERE bead_id = ?1 ORDER BY label")?;
    let rows = stmt.query_map(params![bead_id], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub bead_id: String,
    pub author: String,
    pub body: String,
    pub parent_comment_id: Option<String>,
    pub created_at: String,
    pub metadata: Option<String>,
}

pub fn add_comment(
    conn: &Connection,
    project_key: &str,
    id: &str,
    bead_id: &str,
    author: &str,
    body: &str,
    parent_comment_id: Option<&str>,
    metadata: Option<&str>,
) -> Result<Comment> {
    let now = Utc::now().to_rfc3339();
    super::events::append_event(
        conn,
        project_key,
        "comment_added",
        &serde_json::json!({"id": id, "bead_id": bead_id, "author": author, "body": body}),
    )?;
    conn.execute(
        "INSERT INTO bead_comments (id, bead_id, author, body, parent_comment_id, created_at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, bead_id, author, body, parent_comment_id, now, metadata],
    )?;
    Ok(Comment {
        id: id.to_string(),
        bead_id: bead_id.to_string(),
        author: author.to_string(),
        body: body.to_string(),
        parent_comment_id: parent_comment_id.map(String::from),
        created_at: now,
        metadata: metadata.map(String::from),
    })
}

pub fn get_comments(conn: &Connection, bead_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, bead_id, author, body, parent_comment_id, created_at, metadata
         FROM bead_comments WHERE bead_id = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map(params![bead_id], |row| {
            Ok(Comment {
                id: row.get(0)?,
                bead_id: row.get(1)?,
                author: row.get(2)?,
                body: row.get(3)?,
                parent_comment_id: row.get(4)?,
                created_at: row.get(5)?,
                metadata: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
