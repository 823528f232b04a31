// db/graph.rs
// Dependency graph: the `blocks` subgraph over beads must stay a DAG, and
// `blocked_beads_cache` materializes each bead's transitive open blockers so
// `get_next_ready` doesn't re-walk the graph on every read.

use crate::error::{HiveError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use strum::{Display, EnumString};

/// Depth past which the graph is considered pathological rather than merely
/// deep; BFS bails out with `GraphTooDeep` instead of looping forever.
const MAX_GRAPH_DEPTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Relationship {
    Blocks,
    #[strum(serialize = "blocked-by")]
    #[serde(rename = "blocked-by")]
    BlockedBy,
    Related,
    #[strum(serialize = "discovered-from")]
    #[serde(rename = "discovered-from")]
    DiscoveredFrom,
}

/// BFS over `blocks` edges starting at `start`, following `depends_on_id`
/// (i.e. "what does `start`'s blocker depend on") to see whether `target` is
/// reachable. Used to detect whether adding `bead_id -> depends_on_id` would
/// close a cycle.
fn reaches(conn: &Connection, start: &str, target: &str) -> Result<bool> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((start.to_string(), 0usize));
    visited.insert(start.to_string());

    while let Some((node, depth)) = queue.pop_front() {
        if depth > MAX_GRAPH_DEPTH {
            return Err(HiveError::GraphTooDeep);
        }
        if node == target {
            return Ok(true);
        }
        let mut stmt = conn.prepare(
            "SELECT depends_on_id FROM bead_dependencies WHERE bead_id = ?1 AND relationship = 'blocks'",
        )?;
        let next: Vec<String> = stmt
            .query_map(params![node], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for n in next {
            if visited.insert(n.clone()) {
                queue.push_back((n, depth + 1));
            }
        }
    }
    Ok(false)
}

/// Would adding `bead_id` depends-on `depends_on_id` (a `blocks` edge) create
/// a cycle? True iff `depends_on_id` already (transitively) depends on
/// `bead_id`.
pub fn would_create_cycle(conn: &Connection, bead_id: &str, depends_on_id: &str) -> Result<bool> {
    if bead_id == depends_on_id {
        return Ok(true);
    }
    reaches(conn, depends_on_id, bead_id)
}

fn shortest_cycle_path(conn: &Connection, bead_id: &str, depends_on_id: &str) -> Result<Vec<String>> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(vec![depends_on_id.to_string()]);
    visited.insert(depends_on_id.to_string());

    while let Some(path) = queue.pop_front() {
        let node = path.last().unwrap().clone();
        if node == bead_id {
            let mut full = path;
            full.push(depends_on_id.to_string());
            return Ok(full);
        }
        let mut stmt = conn.prepare(
            "SELECT depends_on_id FROM bead_dependencies WHERE bead_id = ?1 AND relationship = 'blocks'",
        )?;
        let next: Vec<String> = stmt
            .query_map(params![node], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for n in next {
            if visited.insert(n.clone()) {
                let mut p = path.clone();
                p.push(n);
                queue.push_back(p);
            }
        }
    }
    Ok(vec![bead_id.to_string(), depends_on_id.to_string()])
}

/// Add a dependency edge. For `Relationship::Blocks`, rejects edges that
/// would create a cycle and invalidates the blocked-cache of dependents.
pub fn add_dependency(
    conn: &Connection,
    project_key: &str,
    bead_id: &str,
    depends_on_id: &str,
    relationship: Relationship,
) -> Result<()> {
    if relationship == Relationship::Blocks && would_create_cycle(conn, bead_id, depends_on_id)? {
        let path = shortest_cycle_path(conn, bead_id, depends_on_id)?;
        return Err(HiveError::Cycle(path));
    }

    super::events::append_event(
        conn,
        project_key,
        "dependency_added",
        &serde_json::json!({"bead_id": bead_id, "depends_on_id": depends_on_id, "relationship": relationship.to_string()}),
    )?;

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO bead_dependencies (bead_id, depends_on_id, relationship, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![bead_id, depends_on_id, relationship.to_string(), now],
    )?;

    if relationship == Relationship::Blocks {
        invalidate_blocked_cache(conn, bead_id)?;
    }
    Ok(())
}

pub fn remove_dependency(
    conn: &Connection,
    project_key: &str,
    bead_id: &str,
    depends_on_id: &str,
    relationship: Relationship,
) -> Result<()> {
    super::events::append_event(
        conn,
        project_key,
        "dependency_removed",
        &serde_json::json!({"bead_id": bead_id, "depends_on_id": depends_on_id, "relationship": relationship.to_string()}),
    )?;
    conn.execute(
        "DELETE FROM bead_dependencies WHERE bead_id = ?1 AND depends_on_id = ?2 AND relationship = ?3",
        params![bead_id, depends_on_id, relationship.to_string()],
    )?;
    if relationship == Relationship::Blocks {
        invalidate_blocked_cache(conn, bead_id)?;
    }
    Ok(())
}

pub fn get_dependencies(conn: &Connection, bead_id: &str) -> Result<Vec<(String, Relationship)>> {
    let mut stmt = conn.prepare(
        "SELECT depends_on_id, relationship FROM bead_dependencies WHERE bead_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![bead_id], |row| {
            let rel: String = row.get(1)?;
            Ok((row.get::<_, String>(0)?, rel))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, rel)| rel.parse().ok().map(|r| (id, r)))
        .collect())
}

pub fn get_dependents(conn: &Connection, depends_on_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT bead_id FROM bead_dependencies WHERE depends_on_id = ?1")?;
    let rows = stmt.query_map(params![depends_on_id], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Direct, still-open blockers of `bead_id` (status not `closed`/`tombstone`).
pub fn get_open_blockers(conn: &Connection, bead_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT d.depends_on_id FROM bead_dependencies d
         JOIN beads b ON b.id = d.depends_on_id
         WHERE d.bead_id = ?1 AND d.relationship = 'blocks'
           AND b.status NOT IN ('closed', 'tombstone')",
    )?;
    let rows = stmt.query_map(params![bead_id], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Recompute the transitive open-blocker set for `bead_id` and materialize
/// it in `blocked_beads_cache`. Absence of a row means "unblocked".
pub fn rebuild_blocked_cache(conn: &Connection, bead_id: &str) -> Result<Vec<String>> {
    let mut visited = HashSet::new();
    let mut open_blockers = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((bead_id.to_string(), 0usize));
    visited.insert(bead_id.to_string());

    while let Some((node, depth)) = queue.pop_front() {
        if depth > MAX_GRAPH_DEPTH {
            return Err(HiveError::GraphTooDeep);
        }
        for blocker in get_open_blockers(conn, &node)? {
            open_blockers.insert(blocker.clone());
            if visited.insert(blocker.clone()) {
                queue.push_back((blocker, depth + 1));
            }
        }
        // also walk closed blockers transitively, their blockers might still be open
        let mut stmt = conn.prepare(
            "SELECT depends_on_id FROM bead_dependencies WHERE bead_id = ?1 AND relationship = 'blocks'",
        )?;
        let all: Vec<String> = stmt.query_map(params![node], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        for n in all {
            if visited.insert(n.clone()) {
                queue.push_back((n, depth + 1));
            }
        }
    }

    let now = Utc::now().to_rfc3339();
    if open_blockers.is_empty() {
        conn.execute("DELETE FROM blocked_beads_cache WHERE bead_id = ?1", params![bead_id])?;
    } else {
        let ids: Vec<String> = open_blockers.into_iter().collect();
        let ids_json = serde_json::to_string(&ids)?;
        conn.execute(
            "INSERT INTO blocked_beads_cache (bead_id, blocker_ids, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(bead_id) DO UPDATE SET blocker_ids = ?2, updated_at = ?3",
            params![bead_id, ids_json, now],
        )?;
        return Ok(ids);
    }
    Ok(vec![])
}

fn blocks_dependents(conn: &Connection, depends_on_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT bead_id FROM bead_dependencies WHERE depends_on_id = ?1 AND relationship = 'blocks'")?;
    let rows = stmt.query_map(params![depends_on_id], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Recompute the cached blocker set for `bead_id` and every bead that
/// directly or transitively depends on it via a `blocks` edge -- a change to
/// `bead_id` (a new/removed edge, a status transition) can change whether
/// any of them count as blocked.
pub fn invalidate_blocked_cache(conn: &Connection, bead_id: &str) -> Result<()> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(bead_id.to_string());
    visited.insert(bead_id.to_string());

    while let Some(node) = queue.pop_front() {
        rebuild_blocked_cache(conn, &node)?;
        for dependent in blocks_dependents(conn, &node)? {
            if visited.insert(dependent.clone()) {
                queue.push_back(dependent);
            }
        }
    }
    Ok(())
}

/// The single highest-priority ready bead in `project_key`: status open or
/// in-progress, not deleted, no row in `blocked_beads_cache`. Ties break on
/// priority ascending, then `created_at`, then id.
pub fn get_next_ready(conn: &Connection, project_key: &str) -> Result<Option<super::beads::Bead>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT beads.id FROM beads
             LEFT JOIN blocked_beads_cache ON blocked_beads_cache.bead_id = beads.id
             WHERE beads.project_key = ?1
               AND beads.status IN ('open', 'in_progress')
               AND beads.deleted_at IS NULL
               AND blocked_beads_cache.bead_id IS NULL
             ORDER BY beads.priority ASC, beads.created_at ASC, beads.id ASC
             LIMIT 1",
            params![project_key],
            |r| r.get(0),
        )
        .optional()?;
    id.map(|id| super::beads::get(conn, &id)).transpose()
}

/// Every bead in `project_key` with a row in `blocked_beads_cache`, i.e.
/// every bead with at least one open transitive blocker.
pub fn get_blocked(conn: &Connection, project_key: &str) -> Result<Vec<super::beads::Bead>> {
    let mut stmt = conn.prepare(
        "SELECT beads.id FROM beads
         JOIN blocked_beads_cache ON blocked_beads_cache.bead_id = beads.id
         WHERE beads.project_key = ?1
         ORDER BY beads.priority ASC, beads.created_at ASC",
    )?;
    let ids: Vec<String> = stmt.query_map(params![project_key], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
    ids.into_iter().map(|id| super::beads::get(conn, &id)).collect()
}

pub fn get_blocked_cache(conn: &Connection, bead_id: &str) -> Result<Vec<String>> {
    let cached: Option<String> = conn
        .query_row(
            "SELECT blocker_ids FROM blocked_beads_cache WHERE bead_id = ?1",
            params![bead_id],
            |r| r.get(0),
        )
        .optional()?;
    match cached {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::beads::{self, IssueType, NewBead};
    use crate::db::test_support::setup_test_connection;

    fn bead(conn: &Connection, id: &str) {
        beads::create(
            conn,
            "/repo",
            id,
            &NewBead {
                title: id.to_string(),
                description: None,
                issue_type: IssueType::Task,
                priority: 2,
                parent_id: None,
                files_touched: None,
                agent_name: None,
                agent_model: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn detects_direct_cycle() {
        let conn = setup_test_connection();
        bead(&conn, "bd-1");
        bead(&conn, "bd-2");
        add_dependency(&conn, "/repo", "bd-1", "bd-2", Relationship::Blocks).unwrap();
        let err = add_dependency(&conn, "/repo", "bd-2", "bd-1", Relationship::Blocks).unwrap_err();
        assert!(matches!(err, HiveError::Cycle(_)));
    }

    #[test]
    fn transitive_blockers_materialize_in_cache() {
        let conn = setup_test_connection();
        bead(&conn, "bd-1");
        bead(&conn, "bd-2");
        bead(&conn, "bd-3");
        add_dependency(&conn, "/repo", "bd-1", "bd-2", Relationship::Blocks).unwrap();
        add_dependency(&conn, "/repo", "bd-2", "bd-3", Relationship::Blocks).unwrap();
        let blockers = rebuild_blocked_cache(&conn, "bd-1").unwrap();
        assert!(blockers.contains(&"bd-2".to_string()));
        assert!(blockers.contains(&"bd-3".to_string()));
    }

    #[test]
    fn closing_blocker_removes_it_from_open_blockers() {
        let conn = setup_test_connection();
        bead(&conn, "bd-1");
        bead(&conn, "bd-2");
        add_dependency(&conn, "/repo", "bd-1", "bd-2", Relationship::Blocks).unwrap();
        assert_eq!(get_open_blockers(&conn, "bd-1").unwrap(), vec!["bd-2".to_string()]);
        beads::set_status(&conn, "/repo", "bd-2", beads::Status::Closed).unwrap();
        assert!(get_open_blockers(&conn, "bd-1").unwrap().is_empty());
    }

    #[test]
    fn next_ready_excludes_blocked_beads_and_breaks_ties_by_priority_then_created_then_id() {
        let conn = setup_test_connection();
        bead(&conn, "bd-2");
        bead(&conn, "bd-1");
        bead(&conn, "bd-3");
        add_dependency(&conn, "/repo", "bd-1", "bd-3", Relationship::Blocks).unwrap();

        // bd-1 is blocked by the still-open bd-3, so despite sorting first
        // alphabetically it must be skipped in favor of bd-2.
        let ready = get_next_ready(&conn, "/repo").unwrap().unwrap();
        assert_eq!(ready.id, "bd-2");

        let blocked = get_blocked(&conn, "/repo").unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].id, "bd-1");
    }

    #[test]
    fn next_ready_becomes_available_once_its_blocker_closes() {
        let conn = setup_test_connection();
        bead(&conn, "bd-1");
        bead(&conn, "bd-2");
        add_dependency(&conn, "/repo", "bd-1", "bd-2", Relationship::Blocks).unwrap();

        // bd-2 has no blockers of its own, so it's ready even while it's
        // blocking bd-1.
        let ready = get_next_ready(&conn, "/repo").unwrap().unwrap();
        assert_eq!(ready.id, "bd-2");
        assert_eq!(get_blocked(&conn, "/repo").unwrap().iter().map(|b| b.id.clone()).collect::<Vec<_>>(), vec!["bd-1".to_string()]);

        beads::set_status(&conn, "/repo", "bd-2", beads::Status::Closed).unwrap();
        let ready = get_next_ready(&conn, "/repo").unwrap().unwrap();
        assert_eq!(ready.id, "bd-1");
        assert!(get_blocked(&conn, "/repo").unwrap().is_empty());
    }

    #[test]
    fn next_ready_is_none_for_an_empty_project() {
        let conn = setup_test_connection();
        assert!(get_next_ready(&conn, "/repo").unwrap().is_none());
    }
}
