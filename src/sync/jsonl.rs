// src/sync/jsonl.rs
// Canonical JSONL record shapes for issues.jsonl / memories.jsonl. Field
// order matters: it's what makes a re-export of unchanged data diff clean
// in git, so these structs' declaration order IS the wire order.

use crate::db::beads::Bead;
use crate::db::memory::Memory;
use crate::error::{HiveError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeadRecord {
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
    pub labels: Vec<String>,
}

impl From<(Bead, Vec<String>)> for BeadRecord {
    fn from((bead, labels): (Bead, Vec<String>)) -> Self {
        Self {
            id: bead.id,
            project_key: bead.project_key,
            title: bead.title,
            description: bead.description,
            issue_type: bead.issue_type,
            priority: bead.priority,
            status: bead.status,
            parent_id: bead.parent_id,
            created_at: bead.created_at,
            updated_at: bead.updated_at,
            closed_at: bead.closed_at,
            deleted_at: bead.deleted_at,
            content_hash: bead.content_hash,
            files_touched: bead.files_touched,
            labels,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub collection: String,
    pub created_at: String,
    pub confidence: f64,
    pub tags: Vec<String>,
}

impl From<Memory> for MemoryRecord {
    fn from(m: Memory) -> Self {
        Self {
            id: m.id,
            content: m.content,
            collection: m.collection,
            created_at: m.created_at,
            confidence: m.confidence,
            tags: m.tags,
        }
    }
}

/// Serialize records to JSONL text, one object per line.
pub fn to_jsonl<T: Serialize>(records: &[T]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse JSONL text into records. A malformed line is reported by position
/// rather than aborting the whole batch.
pub fn parse_jsonl<T: for<'de> Deserialize<'de>>(text: &str) -> (Vec<T>, Vec<(usize, HiveError)>) {
    let mut records = Vec::new();
    let mut errors = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => errors.push((lineno + 1, HiveError::Json(e))),
        }
    }
    (records, errors)
}
