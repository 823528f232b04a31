// src/sync/mod.rs
// JSONL git-sync: issues.jsonl/memories.jsonl are the durable, diffable,
// git-mergeable representation of the beads/memories tables. `flush`
// exports the database to disk on a debounce; `import` reads a
// post-pull/post-merge file back into the database; `merge` backs a
// custom git merge driver for issues.jsonl conflicts.

pub mod flush;
pub mod jsonl;
pub mod merge;

pub use flush::{FlushManager, export_project};
pub use merge::{CLOCK_SKEW_GRACE_MS, Conflict, DEFAULT_TOMBSTONE_TTL_MS, MergeResult, merge_3way};

use crate::config::SyncConfig;
use crate::db::beads::Status;
use crate::db::pool::DatabasePool;
use crate::error::Result;
use jsonl::{BeadRecord, parse_jsonl};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::{info, warn};

/// Read `issues.jsonl` off disk and reconcile it into the database: records
/// absent locally are inserted, records with a newer `content_hash` replace
/// the local row. Malformed lines are logged and skipped, not fatal.
pub async fn import_project(pool: &DatabasePool, sync: &SyncConfig, project_key: &str) -> Result<usize> {
    let path = sync.issues_path();
    if !path.exists() {
        return Ok(0);
    }
    let text = tokio::fs::read_to_string(&path).await?;
    let (records, errors): (Vec<BeadRecord>, _) = parse_jsonl(&text);
    for (lineno, err) in &errors {
        warn!(line = lineno, "skipping malformed issues.jsonl record: {}", err);
    }

    let project_key = project_key.to_string();
    let applied = pool.run(move |conn| apply_records(conn, &project_key, &records)).await?;
    info!(applied, skipped = errors.len(), "imported issues.jsonl");
    Ok(applied)
}

fn apply_records(conn: &Connection, project_key: &str, records: &[BeadRecord]) -> Result<usize> {
    let mut applied = 0;
    for record in records {
        if record.project_key != project_key {
            continue;
        }
        let existing_hash: Option<String> = conn
            .query_row("SELECT content_hash FROM beads WHERE id = ?1", params![record.id], |r| r.get(0))
            .optional()?;
        if existing_hash.as_deref() == Some(record.content_hash.as_str()) {
            continue;
        }

        conn.execute(
            "INSERT INTO beads (id, project_key, title, description, issue_type, priority, status,
                parent_id, created_at, updated_at, closed_at, deleted_at, content_hash, files_touched)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title, description = excluded.description, priority = excluded.priority,
                status = excluded.status, updated_at = excluded.updated_at, closed_at = excluded.closed_at,
                deleted_at = excluded.deleted_at, content_hash = excluded.content_hash,
                files_touched = excluded.files_touched",
            params![
                record.id,
                record.project_key,
                record.title,
                record.description,
                record.issue_type,
                record.priority,
                record.status,
                record.parent_id,
                record.created_at,
                record.updated_at,
                record.closed_at,
                record.deleted_at,
                record.content_hash,
                record.files_touched,
            ],
        )?;
        conn.execute("DELETE FROM bead_labels WHERE bead_id = ?1", params![record.id])?;
        for label in &record.labels {
            conn.execute(
                "INSERT OR IGNORE INTO bead_labels (bead_id, label) VALUES (?1, ?2)",
                params![record.id, label],
            )?;
        }
        applied += 1;
    }
    Ok(applied)
}

/// Custom git merge driver entry point: `base`/`ours`/`theirs` are the three
/// paths git provides for a conflicted `issues.jsonl`. The merged content is
/// written back to `ours` per the merge-driver contract; any conflicts found
/// are resolved (last-writer-wins) but still returned so the caller can log
/// them, since git itself never sees a marker-based conflict here.
pub async fn run_merge_driver(base: &Path, ours: &Path, theirs: &Path) -> Result<Vec<Conflict>> {
    let read_records = |path: &Path| -> Result<Vec<BeadRecord>> {
        if !path.exists() {
            return Ok(vec![]);
        }
        let text = std::fs::read_to_string(path)?;
        let (records, errors) = parse_jsonl::<BeadRecord>(&text);
        for (lineno, err) in errors {
            warn!(line = lineno, path = %path.display(), "skipping malformed record during merge: {}", err);
        }
        Ok(records)
    };

    let base_records = read_records(base)?;
    let local_records = read_records(ours)?;
    let remote_records = read_records(theirs)?;

    let result = merge_3way(&base_records, &local_records, &remote_records);
    let text = jsonl::to_jsonl(&result.merged)?;
    tokio::fs::write(ours, text).await?;

    for conflict in &result.conflicts {
        warn!(id = %conflict.id, resolution = %conflict.resolution, "issues.jsonl merge conflict resolved");
    }
    Ok(result.conflicts)
}

/// Drop beads tombstoned longer than `ttl` ago from an in-memory record set,
/// so old deletions eventually stop being carried in every sync round.
pub fn expire_tombstones(records: Vec<BeadRecord>, now: chrono::DateTime<chrono::Utc>) -> Vec<BeadRecord> {
    let ttl = merge::tombstone_ttl();
    records
        .into_iter()
        .filter(|r| {
            if r.status != Status::Tombstone.to_string() {
                return true;
            }
            match r.deleted_at.as_deref().and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) {
                Some(deleted_at) => {
                    let age = now.signed_duration_since(deleted_at.with_timezone(&chrono::Utc));
                    age.to_std().map(|age| age < ttl).unwrap_or(true)
                }
                None => true,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::beads::{IssueType, NewBead, create};
    use crate::db::test_support::setup_test_pool;

    #[tokio::test]
    async fn import_inserts_new_records_and_skips_unchanged() {
        let pool = setup_test_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let sync = SyncConfig { dir: tmp.path().to_path_buf(), ..SyncConfig::default() };

        let record = BeadRecord {
            id: "bd-1".into(),
            project_key: "/repo".into(),
            title: "imported".into(),
            description: None,
            issue_type: "task".into(),
            priority: 2,
            status: "open".into(),
            parent_id: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
            closed_at: None,
            deleted_at: None,
            content_hash: "abc".into(),
            files_touched: None,
            labels: vec!["from-git".into()],
        };
        tokio::fs::write(sync.issues_path(), jsonl::to_jsonl(&[record]).unwrap()).await.unwrap();

        let applied = import_project(&pool, &sync, "/repo").await.unwrap();
        assert_eq!(applied, 1);
        let again = import_project(&pool, &sync, "/repo").await.unwrap();
        assert_eq!(again, 0, "unchanged content_hash should not reapply");
    }

    #[tokio::test]
    async fn merge_driver_writes_merged_result_to_ours() {
        let tmp = tempfile::tempdir().unwrap();
        let base_path = tmp.path().join("base.jsonl");
        let ours_path = tmp.path().join("ours.jsonl");
        let theirs_path = tmp.path().join("theirs.jsonl");
        tokio::fs::write(&base_path, "").await.unwrap();
        tokio::fs::write(&ours_path, "").await.unwrap();
        tokio::fs::write(&theirs_path, "").await.unwrap();

        let conflicts = run_merge_driver(&base_path, &ours_path, &theirs_path).await.unwrap();
        assert!(conflicts.is_empty());
        assert!(ours_path.exists());
    }

    #[tokio::test]
    async fn round_trips_through_export_then_import() {
        let pool = setup_test_pool().await;
        pool.run(|conn| {
            create(conn, "/repo", "bd-1", &NewBead { title: "a".into(), issue_type: IssueType::Task, priority: 1, ..Default::default() })
        })
        .await
        .unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let sync = SyncConfig { dir: tmp.path().to_path_buf(), ..SyncConfig::default() };
        export_project(&pool, &sync, "/repo").await.unwrap();

        let pool2 = setup_test_pool().await;
        let applied = import_project(&pool2, &sync, "/repo").await.unwrap();
        assert_eq!(applied, 1);
    }
}
