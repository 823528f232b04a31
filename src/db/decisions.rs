// db/decisions.rs
// Decision traces: an audit record of why an agent chose what it chose.

use crate::error::{HiveError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    StrategySelection,
    WorkerSpawn,
    ReviewDecision,
    FileSelection,
    ScopeChange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub id: String,
    pub decision_type: String,
    pub epic_id: Option<String>,
    pub bead_id: Option<String>,
    pub agent_name: String,
    pub project_key: String,
    pub decision: Value,
    pub rationale: Option<String>,
    pub inputs_gathered: Option<Value>,
    pub policy_evaluated: Option<Value>,
    pub alternatives: Option<Value>,
    pub precedent_cited: Option<Value>,
    pub outcome_event_id: Option<i64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewDecisionTrace {
    pub epic_id: Option<String>,
    pub bead_id: Option<String>,
    pub agent_name: String,
    pub decision: Value,
    pub rationale: Option<String>,
    pub inputs_gathered: Option<Value>,
    pub policy_evaluated: Option<Value>,
    pub alternatives: Option<Value>,
    pub precedent_cited: Option<Value>,
}

fn opt_json(v: &Option<Value>) -> Result<Option<String>> {
    Ok(match v {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    })
}

fn row_to_trace(row: &rusqlite::Row) -> rusqlite::Result<DecisionTrace> {
    let decision_raw: String = row.get("decision")?;
    let parse_opt = |s: Option<String>| s.and_then(|s| serde_json::from_str(&s).ok());
    Ok(DecisionTrace {
        id: row.get("id")?,
        decision_type: row.get("decision_type")?,
        epic_id: row.get("epic_id")?,
        bead_id: row.get("bead_id")?,
        agent_name: row.get("agent_name")?,
        project_key: row.get("project_key")?,
        decision: serde_json::from_str(&decision_raw).unwrap_or(Value::Null),
        rationale: row.get("rationale")?,
        inputs_gathered: parse_opt(row.get("inputs_gathered")?),
        policy_evaluated: parse_opt(row.get("policy_evaluated")?),
        alternatives: parse_opt(row.get("alternatives")?),
        precedent_cited: parse_opt(row.get("precedent_cited")?),
        outcome_event_id: row.get("outcome_event_id")?,
        timestamp: row.get("timestamp")?,
    })
}

pub fn record(conn: &Connection, project_key: &str, id: &str, decision_type: DecisionType, new: &NewDecisionTrace) -> Result<DecisionTrace> {
    let now = Utc::now().to_rfc3339();
    let decision_str = serde_json::to_string(&new.decision)?;

    super::events::append_event(
        conn,
        project_key,
        "decision_recorded",
        &serde_json::json!({"id": id, "decision_type": decision_type.to_string(), "bead_id": new.bead_id}),
    )?;

    conn.execute(
        "INSERT INTO decision_traces (id, decision_type, epic_id, bead_id, agent_name, project_key,
            decision, rationale, inputs_gathered, policy_evaluated, alternatives, precedent_cited, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id,
            decision_type.to_string(),
            new.epic_id,
            new.bead_id,
            new.agent_name,
            project_key,
            decision_str,
            new.rationale,
            opt_json(&new.inputs_gathered)?,
            opt_json(&new.policy_evaluated)?,
            opt_json(&new.alternatives)?,
            opt_json(&new.precedent_cited)?,
            now,
        ],
    )?;
    get(conn, id)
}

pub fn get(conn: &Connection, id: &str) -> Result<DecisionTrace> {
    conn.query_row("SELECT * FROM decision_traces WHERE id = ?1", params![id], row_to_trace)
        .optional()?
        .ok_or_else(|| HiveError::NotFound(format!("decision trace {id}")))
}

/// Attach the event emitted once this decision's outcome is known (e.g. the
/// `bead_closed` event for a review decision).
pub fn set_outcome(conn: &Connection, id: &str, outcome_event_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE decision_traces SET outcome_event_id = ?1 WHERE id = ?2",
        params![outcome_event_id, id],
    )?;
    Ok(())
}

pub fn for_bead(conn: &Connection, bead_id: &str) -> Result<Vec<DecisionTrace>> {
    let mut stmt = conn.prepare("SELECT * FROM decision_traces WHERE bead_id = ?1 ORDER BY timestamp ASC")?;
    let rows = stmt.query_map(params![bead_id], row_to_trace)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn for_project(conn: &Connection, project_key: &str, limit: i64) -> Result<Vec<DecisionTrace>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM decision_traces WHERE project_key = ?1 ORDER BY timestamp DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![project_key, limit], row_to_trace)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    #[test]
    fn record_and_fetch_by_bead() {
        let conn = setup_test_connection();
        let new = NewDecisionTrace {
            bead_id: Some("bd-1".into()),
            agent_name: "agent-1".into(),
            decision: serde_json::json!({"chose": "worker-pool"}),
            rationale: Some("fastest path".into()),
            ..Default::default()
        };
        record(&conn, "/repo", "dt-1", DecisionType::WorkerSpawn, &new).unwrap();
        let traces = for_bead(&conn, "bd-1").unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].decision_type, "worker_spawn");
    }

    #[test]
    fn set_outcome_links_event() {
        let conn = setup_test_connection();
        record(&conn, "/repo", "dt-1", DecisionType::ReviewDecision, &NewDecisionTrace {
            agent_name: "a1".into(),
            decision: serde_json::json!("approve"),
            ..Default::default()
        })
        .unwrap();
        set_outcome(&conn, "dt-1", 42).unwrap();
        assert_eq!(get(&conn, "dt-1").unwrap().outcome_event_id, Some(42));
    }
}
