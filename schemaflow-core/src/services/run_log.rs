//! Run log - one row per unit attempt
//!
//! Lives next to the ledgers in the same database. Successful attempts are
//! written inside the unit's transaction; failures are written after the
//! rollback, so the last error survives the aborted unit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

use super::ledger::{format_timestamp, parse_timestamp};
use crate::domain::result::Result;
use crate::domain::{Direction, UnitError};

pub const RUN_LOG_TABLE: &str = "schema_run_log";

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique ID based on timestamp + counter
fn generate_id() -> i64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();

    // Lower 16 bits for the counter (65536 unique IDs per millisecond)
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    ((timestamp << 16) | counter) as i64
}

/// What happened to a unit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    RolledBack,
    Failed,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::RolledBack => "rolled_back",
            Outcome::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "applied" => Outcome::Applied,
            "rolled_back" => Outcome::RolledBack,
            _ => Outcome::Failed,
        }
    }
}

/// A run event to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub namespace: String,
    pub version: String,
    pub direction: Direction,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RunEvent {
    pub fn new(
        namespace: impl Into<String>,
        version: impl Into<String>,
        direction: Direction,
        outcome: Outcome,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
            direction,
            outcome,
            error_kind: None,
            error_message: None,
        }
    }

    /// Set error information
    pub fn with_error(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self.error_message = Some(message.into());
        self
    }
}

/// A run event as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id: i64,
    pub logged_at: chrono::DateTime<Utc>,
    pub namespace: String,
    pub version: String,
    pub direction: Direction,
    pub outcome: Outcome,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl RunLogEntry {
    /// The error carried by a failed attempt
    pub fn unit_error(&self) -> Option<UnitError> {
        if self.outcome != Outcome::Failed {
            return None;
        }
        Some(UnitError {
            direction: self.direction,
            kind: self.error_kind.clone().unwrap_or_default(),
            message: self.error_message.clone().unwrap_or_default(),
            at: self.logged_at,
        })
    }
}

/// Access to the run log table
pub struct RunLog;

impl RunLog {
    /// Create the run log table if needed
    pub fn ensure(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGINT PRIMARY KEY,
                logged_at TIMESTAMP NOT NULL,
                namespace VARCHAR NOT NULL,
                version VARCHAR NOT NULL,
                direction VARCHAR NOT NULL,
                outcome VARCHAR NOT NULL,
                error_kind VARCHAR,
                error_message VARCHAR
            )",
            RUN_LOG_TABLE
        ))?;
        Ok(())
    }

    /// Record an event
    pub fn record(conn: &Connection, event: &RunEvent) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (
                    id, logged_at, namespace, version, direction, outcome, error_kind, error_message
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                RUN_LOG_TABLE
            ),
            duckdb::params![
                generate_id(),
                format_timestamp(Utc::now()),
                &event.namespace,
                &event.version,
                event.direction.as_str(),
                event.outcome.as_str(),
                &event.error_kind,
                &event.error_message,
            ],
        )?;
        Ok(())
    }

    /// Most recent entries of a namespace, newest first
    pub fn recent(conn: &Connection, namespace: &str, limit: usize) -> Result<Vec<RunLogEntry>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, logged_at::VARCHAR, namespace, version, direction, outcome,
                    error_kind, error_message
             FROM {}
             WHERE namespace = ?
             ORDER BY id DESC
             LIMIT ?",
            RUN_LOG_TABLE
        ))?;
        let rows = stmt.query_map(duckdb::params![namespace, limit as i64], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Latest entry per version of a namespace
    pub fn latest_by_version(
        conn: &Connection,
        namespace: &str,
    ) -> Result<HashMap<String, RunLogEntry>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, logged_at::VARCHAR, namespace, version, direction, outcome,
                    error_kind, error_message
             FROM {}
             WHERE namespace = ?
             QUALIFY row_number() OVER (PARTITION BY version ORDER BY id DESC) = 1",
            RUN_LOG_TABLE
        ))?;
        let rows = stmt.query_map([namespace], row_to_entry)?;

        let mut latest = HashMap::new();
        for row in rows {
            let entry = row?;
            latest.insert(entry.version.clone(), entry);
        }
        Ok(latest)
    }
}

fn row_to_entry(row: &duckdb::Row) -> duckdb::Result<RunLogEntry> {
    let logged_at: String = row.get(1)?;
    let direction: String = row.get(4)?;
    let outcome: String = row.get(5)?;
    Ok(RunLogEntry {
        id: row.get(0)?,
        logged_at: parse_timestamp(&logged_at),
        namespace: row.get(2)?,
        version: row.get(3)?,
        direction: if direction == "backward" {
            Direction::Backward
        } else {
            Direction::Forward
        },
        outcome: Outcome::parse(&outcome),
        error_kind: row.get(6)?,
        error_message: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        RunLog::ensure(&conn).unwrap();
        conn
    }

    #[test]
    fn test_record_and_read_back() {
        let conn = conn();
        RunLog::record(
            &conn,
            &RunEvent::new("migrations", "A", Direction::Forward, Outcome::Applied),
        )
        .unwrap();

        let entries = RunLog::recent(&conn, "migrations", 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, "A");
        assert_eq!(entries[0].outcome, Outcome::Applied);
        assert!(entries[0].unit_error().is_none());
    }

    #[test]
    fn test_latest_entry_wins() {
        let conn = conn();
        RunLog::record(
            &conn,
            &RunEvent::new("migrations", "C", Direction::Forward, Outcome::Failed)
                .with_error("ExecutionFailure", "first"),
        )
        .unwrap();
        RunLog::record(
            &conn,
            &RunEvent::new("migrations", "C", Direction::Forward, Outcome::Failed)
                .with_error("ExecutionTimeout", "second"),
        )
        .unwrap();

        let latest = RunLog::latest_by_version(&conn, "migrations").unwrap();
        let error = latest["C"].unit_error().unwrap();
        assert_eq!(error.kind, "ExecutionTimeout");
        assert_eq!(error.message, "second");
    }

    #[test]
    fn test_namespaces_filtered() {
        let conn = conn();
        RunLog::record(
            &conn,
            &RunEvent::new("seeds", "001", Direction::Forward, Outcome::Applied),
        )
        .unwrap();

        assert!(RunLog::recent(&conn, "migrations", 10).unwrap().is_empty());
        assert!(RunLog::latest_by_version(&conn, "migrations")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_generate_id_is_increasing() {
        let a = generate_id();
        let b = generate_id();
        assert!(b > a);
    }
}
