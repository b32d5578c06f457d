//! Change ledger - which units of a namespace have been applied
//!
//! Mutations take the unit's own transaction, so a unit and its ledger row
//! commit or abort together.

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;

use crate::domain::result::{Error, Result};
use crate::domain::{LedgerEntry, Namespace};

/// Ledger of one namespace
#[derive(Debug, Clone, Copy)]
pub struct Ledger {
    namespace: Namespace,
}

impl Ledger {
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    fn table(&self) -> &'static str {
        self.namespace.ledger_table()
    }

    /// Create the ledger table if it does not exist yet
    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version VARCHAR PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL,
                checksum VARCHAR
            )",
            self.table()
        ))?;
        Ok(())
    }

    /// Applied entries, ascending by version
    pub fn list_applied(&self, conn: &Connection) -> Result<Vec<LedgerEntry>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT version, applied_at::VARCHAR, checksum FROM {} ORDER BY version",
            self.table()
        ))?;
        let entries = stmt.query_map([], |row| {
            let applied_at: String = row.get(1)?;
            Ok(LedgerEntry {
                version: row.get(0)?,
                applied_at: parse_timestamp(&applied_at),
                checksum: row.get(2)?,
            })
        })?;

        let mut result = Vec::new();
        for entry in entries {
            result.push(entry?);
        }
        Ok(result)
    }

    /// Applied versions, ascending
    pub fn applied_versions(&self, conn: &Connection) -> Result<Vec<String>> {
        Ok(self
            .list_applied(conn)?
            .into_iter()
            .map(|e| e.version)
            .collect())
    }

    pub fn contains(&self, conn: &Connection, version: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE version = ?", self.table()),
            [version],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a unit as applied
    ///
    /// Fails if the version is already recorded, which means another run got
    /// there first.
    pub fn record_applied(&self, conn: &Connection, version: &str, checksum: &str) -> Result<()> {
        if self.contains(conn, version)? {
            return Err(Error::inconsistency(format!(
                "{} is already recorded in {}",
                version,
                self.table()
            )));
        }
        conn.execute(
            &format!(
                "INSERT INTO {} (version, applied_at, checksum) VALUES (?, ?, ?)",
                self.table()
            ),
            duckdb::params![version, format_timestamp(Utc::now()), checksum],
        )?;
        Ok(())
    }

    /// Remove a unit's entry after rolling it back
    pub fn record_rolled_back(&self, conn: &Connection, version: &str) -> Result<()> {
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE version = ?", self.table()),
            [version],
        )?;
        if deleted == 0 {
            return Err(Error::inconsistency(format!(
                "{} is not recorded in {}",
                version,
                self.table()
            )));
        }
        Ok(())
    }
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (Connection, Ledger) {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new(Namespace::Migrations);
        ledger.ensure(&conn).unwrap();
        (conn, ledger)
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let (conn, ledger) = ledger();
        ledger.ensure(&conn).unwrap();
        assert!(ledger.list_applied(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_record_and_list_in_version_order() {
        let (conn, ledger) = ledger();
        ledger.record_applied(&conn, "B", "b").unwrap();
        ledger.record_applied(&conn, "A", "a").unwrap();

        let entries = ledger.list_applied(&conn).unwrap();
        let versions: Vec<&str> = entries.iter().map(|e| e.version.as_str()).collect();
        assert_eq!(versions, vec!["A", "B"]);
        assert_eq!(entries[0].checksum.as_deref(), Some("a"));
    }

    #[test]
    fn test_double_apply_is_inconsistent() {
        let (conn, ledger) = ledger();
        ledger.record_applied(&conn, "A", "a").unwrap();
        let err = ledger.record_applied(&conn, "A", "a").unwrap_err();
        assert_eq!(err.kind(), "LedgerInconsistency");
    }

    #[test]
    fn test_roll_back_unknown_entry_is_inconsistent() {
        let (conn, ledger) = ledger();
        let err = ledger.record_rolled_back(&conn, "A").unwrap_err();
        assert_eq!(err.kind(), "LedgerInconsistency");
    }

    #[test]
    fn test_namespaces_are_separate_tables() {
        let conn = Connection::open_in_memory().unwrap();
        let migrations = Ledger::new(Namespace::Migrations);
        let seeds = Ledger::new(Namespace::Seeds);
        migrations.ensure(&conn).unwrap();
        seeds.ensure(&conn).unwrap();

        migrations.record_applied(&conn, "001", "x").unwrap();
        assert!(migrations.contains(&conn, "001").unwrap());
        assert!(!seeds.contains(&conn, "001").unwrap());
    }

    #[test]
    fn test_rolled_back_inside_transaction_is_undone_on_rollback() {
        let (mut conn, ledger) = ledger();
        ledger.record_applied(&conn, "A", "a").unwrap();

        let txn = conn.transaction().unwrap();
        ledger.record_rolled_back(&txn, "A").unwrap();
        txn.rollback().unwrap();

        assert_eq!(ledger.applied_versions(&conn).unwrap(), vec!["A".to_string()]);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now));
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
