// src/sync/merge.rs
// Three-way merge of issues.jsonl snapshots. Conflicts are surfaced to the
// caller, never thrown — a merge always produces a result, with a
// last-writer-wins resolution (by `updated_at`, clock-skew-adjusted) backing
// every reported conflict.

use super::jsonl::BeadRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default tombstone retention: 30 days.
pub const DEFAULT_TOMBSTONE_TTL_MS: u64 = 30 * 24 * 60 * 60 * 1000;
/// Floor below which a configured tombstone TTL is rejected.
pub const MIN_TOMBSTONE_TTL_MS: u64 = 24 * 60 * 60 * 1000;
/// Slack allowed when comparing `updated_at` timestamps across machines.
pub const CLOCK_SKEW_GRACE_MS: u64 = 5 * 60 * 1000;

pub fn tombstone_ttl() -> Duration {
    Duration::from_millis(DEFAULT_TOMBSTONE_TTL_MS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub base: Option<BeadRecord>,
    pub local: Option<BeadRecord>,
    pub remote: Option<BeadRecord>,
    pub resolution: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub merged: Vec<BeadRecord>,
    pub conflicts: Vec<Conflict>,
}

fn index_by_id(records: &[BeadRecord]) -> HashMap<&str, &BeadRecord> {
    records.iter().map(|r| (r.id.as_str(), r)).collect()
}

fn parsed_time(record: &BeadRecord) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&record.updated_at)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Is `a` clearly newer than `b`, outside the clock-skew grace window?
fn clearly_newer(a: &BeadRecord, b: &BeadRecord) -> bool {
    let diff = parsed_time(a) - parsed_time(b);
    diff.num_milliseconds() > CLOCK_SKEW_GRACE_MS as i64
}

/// Merge `local` and `remote` against their common `base`. Every id present
/// in any of the three snapshots is resolved to at most one output record
/// (or none, if both sides agree it was deleted).
pub fn merge_3way(base: &[BeadRecord], local: &[BeadRecord], remote: &[BeadRecord]) -> MergeResult {
    let base_idx = index_by_id(base);
    let local_idx = index_by_id(local);
    let remote_idx = index_by_id(remote);

    let mut ids: Vec<&str> = base_idx.keys().chain(local_idx.keys()).chain(remote_idx.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut result = MergeResult::default();

    for id in ids {
        let base_rec = base_idx.get(id).copied();
        let local_rec = local_idx.get(id).copied();
        let remote_rec = remote_idx.get(id).copied();

        match (base_rec, local_rec, remote_rec) {
            (_, Some(l), None) if base_rec.is_none() || base_rec == Some(l) => {
                result.merged.push(l.clone());
            }
            (_, None, Some(r)) if base_rec.is_none() || base_rec == Some(r) => {
                result.merged.push(r.clone());
            }
            (Some(b), Some(l), Some(r)) => {
                if l == r {
                    result.merged.push(l.clone());
                } else if l == b {
                    result.merged.push(r.clone());
                } else if r == b {
                    result.merged.push(l.clone());
                } else {
                    let (winner, resolution) = if clearly_newer(l, r) {
                        (l, "local (newer updated_at)")
                    } else if clearly_newer(r, l) {
                        (r, "remote (newer updated_at)")
                    } else {
                        (r, "remote (tie within clock-skew grace, remote preferred)")
                    };
                    result.merged.push(winner.clone());
                    result.conflicts.push(Conflict {
                        id: id.to_string(),
                        base: Some(b.clone()),
                        local: Some(l.clone()),
                        remote: Some(r.clone()),
                        resolution: resolution.to_string(),
                    });
                }
            }
            (Some(_), None, None) => {
                // deleted on both sides, nothing to emit
            }
            (Some(b), None, Some(r)) => {
                if r == b {
                    // deleted locally, remote unchanged: honor the deletion
                } else {
                    result.conflicts.push(Conflict {
                        id: id.to_string(),
                        base: Some(b.clone()),
                        local: None,
                        remote: Some(r.clone()),
                        resolution: "remote (local deletion lost to a remote edit)".to_string(),
                    });
                    result.merged.push(r.clone());
                }
            }
            (Some(b), Some(l), None) => {
                if l == b {
                    // deleted remotely, local unchanged: honor the deletion
                } else {
                    result.conflicts.push(Conflict {
                        id: id.to_string(),
                        base: Some(b.clone()),
                        local: Some(l.clone()),
                        remote: None,
                        resolution: "local (remote deletion lost to a local edit)".to_string(),
                    });
                    result.merged.push(l.clone());
                }
            }
            (None, None, None) => unreachable!("id present in index but absent from all three maps"),
            _ => {}
        }
    }

    result
}
