//! Repair scripts - one-shot transactional data fixes
//!
//! A repair script is a single filtered DELETE or UPDATE, either built from
//! a table and predicate or written as raw SQL. It is not part of any unit
//! set and never touches a ledger; every run is written to the run log
//! under the `repair` namespace. Re-running a script is safe as long as its
//! filter no longer matches once the fix is in.

use duckdb::Connection;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::run_log::{Outcome, RunEvent, RunLog};
use crate::adapters::duckdb::{execute_statement, Store};
use crate::adapters::sql::{self, Statement};
use crate::domain::operation::require_filtered_statement;
use crate::domain::result::{Error, Result};
use crate::domain::{Direction, Predicate};

/// Run log namespace for repair scripts
pub const REPAIR_NAMESPACE: &str = "repair";

/// What a repair does, and to which rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    Delete {
        table: String,
        #[serde(rename = "where")]
        predicate: Predicate,
    },
    Update {
        table: String,
        set: Vec<(String, Value)>,
        #[serde(rename = "where")]
        predicate: Predicate,
    },
    /// One DELETE or UPDATE with its own WHERE clause, for fixes a
    /// predicate cannot express (joins, subqueries)
    Sql {
        sql: String,
        #[serde(default)]
        params: Vec<Value>,
    },
}

/// A named fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairScript {
    pub name: String,
    #[serde(flatten)]
    pub action: RepairAction,
}

/// Result of a successful repair run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairOutcome {
    pub name: String,
    pub affected_rows: usize,
}

impl RepairScript {
    pub fn delete(name: impl Into<String>, table: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            name: name.into(),
            action: RepairAction::Delete {
                table: table.into(),
                predicate,
            },
        }
    }

    pub fn update(
        name: impl Into<String>,
        table: impl Into<String>,
        set: Vec<(String, Value)>,
        predicate: Predicate,
    ) -> Self {
        Self {
            name: name.into(),
            action: RepairAction::Update {
                table: table.into(),
                set,
                predicate,
            },
        }
    }

    pub fn sql(name: impl Into<String>, sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            action: RepairAction::Sql {
                sql: sql.into(),
                params,
            },
        }
    }

    /// Reject scripts that could touch every row or do nothing
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_unit("repair script needs a name"));
        }
        let unfiltered = || {
            Error::invalid_unit(format!(
                "repair '{}' has no filter; an explicit predicate is required",
                self.name
            ))
        };
        match &self.action {
            RepairAction::Delete { predicate, .. } if predicate.matches_everything() => {
                Err(unfiltered())
            }
            RepairAction::Update { predicate, .. } if predicate.matches_everything() => {
                Err(unfiltered())
            }
            RepairAction::Update { set, .. } if set.is_empty() => Err(Error::invalid_unit(
                format!("repair '{}' updates no columns", self.name),
            )),
            RepairAction::Sql { sql, .. } => require_filtered_statement(sql)
                .map_err(|e| Error::invalid_unit(format!("repair '{}': {}", self.name, e))),
            _ => Ok(()),
        }
    }

    /// The single statement this script runs
    pub fn statement(&self) -> Statement {
        match &self.action {
            RepairAction::Delete { table, predicate } => sql::delete(table, predicate),
            RepairAction::Update {
                table,
                set,
                predicate,
            } => sql::update(table, set, predicate),
            RepairAction::Sql { sql, params } => Statement {
                sql: sql.clone(),
                params: params.clone(),
            },
        }
    }

    /// Execute the script in one transaction
    ///
    /// On failure nothing is changed and the error is returned as-is.
    pub fn run(&self, store: &Store) -> Result<RepairOutcome> {
        self.validate()?;

        let mut conn = store.connection()?;
        RunLog::ensure(&conn)?;

        match self.run_in_transaction(&mut conn) {
            Ok(affected_rows) => {
                info!("Repair '{}' affected {} rows", self.name, affected_rows);
                Ok(RepairOutcome {
                    name: self.name.clone(),
                    affected_rows,
                })
            }
            Err(e) => {
                error!("Repair '{}' failed: {}", self.name, e);
                let event = RunEvent::new(REPAIR_NAMESPACE, &self.name, Direction::Forward, Outcome::Failed)
                    .with_error(e.kind(), e.to_string());
                if let Err(log_err) = RunLog::record(&conn, &event) {
                    warn!("Could not record failure of repair '{}': {}", self.name, log_err);
                }
                Err(e)
            }
        }
    }

    fn run_in_transaction(&self, conn: &mut Connection) -> Result<usize> {
        let txn = conn.transaction()?;
        let affected = execute_statement(&txn, &self.statement())?;
        RunLog::record(
            &txn,
            &RunEvent::new(REPAIR_NAMESPACE, &self.name, Direction::Forward, Outcome::Applied),
        )?;
        txn.commit()?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .connection()
            .unwrap()
            .execute_batch(
                "CREATE TABLE evenement_engagement (id INTEGER, type_utilisateur VARCHAR, code VARCHAR);
                 INSERT INTO evenement_engagement VALUES
                    (1, 'JEUNE', NULL), (2, 'CONSEILLER', NULL), (3, 'JEUNE', 'ACTION_CREEE');",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_unfiltered_script_rejected() {
        let script = RepairScript::delete("purge", "evenement_engagement", Predicate::All);
        let err = script.validate().unwrap_err();
        assert_eq!(err.kind(), "InvalidUnit");

        let empty_and = RepairScript::delete("purge", "t", Predicate::and(vec![]));
        assert!(empty_and.validate().is_err());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = store();
        let script = RepairScript::delete(
            "purger-evenements-conseiller",
            "evenement_engagement",
            Predicate::eq("type_utilisateur", "CONSEILLER"),
        );

        assert_eq!(script.run(&store).unwrap().affected_rows, 1);
        assert_eq!(script.run(&store).unwrap().affected_rows, 0);
        assert_eq!(store.count_rows("evenement_engagement").unwrap(), 2);

        let conn = store.connection().unwrap();
        let runs = RunLog::recent(&conn, REPAIR_NAMESPACE, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.outcome == Outcome::Applied));
    }

    #[test]
    fn test_update_fills_missing_codes() {
        let store = store();
        let script = RepairScript::update(
            "codes-manquants",
            "evenement_engagement",
            vec![("code".to_string(), json!("INCONNU"))],
            Predicate::is_null("code"),
        );

        assert_eq!(script.run(&store).unwrap().affected_rows, 2);
        assert_eq!(script.run(&store).unwrap().affected_rows, 0);
    }

    #[test]
    fn test_failure_changes_nothing_and_is_logged() {
        let store = store();
        let script = RepairScript::delete(
            "mauvaise-colonne",
            "evenement_engagement",
            Predicate::eq("colonne_absente", 1),
        );

        let err = script.run(&store).unwrap_err();
        assert_eq!(err.kind(), "ExecutionFailure");
        assert_eq!(store.count_rows("evenement_engagement").unwrap(), 3);

        let conn = store.connection().unwrap();
        let runs = RunLog::recent(&conn, REPAIR_NAMESPACE, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, Outcome::Failed);
    }

    #[test]
    fn test_script_from_json() {
        let script: RepairScript = serde_json::from_value(json!({
            "name": "purge",
            "action": "delete",
            "table": "evenement_engagement",
            "where": { "match": "eq", "column": "type_utilisateur", "value": "CONSEILLER" }
        }))
        .unwrap();
        assert_eq!(
            script.action,
            RepairAction::Delete {
                table: "evenement_engagement".to_string(),
                predicate: Predicate::eq("type_utilisateur", "CONSEILLER"),
            }
        );
        assert!(script.validate().is_ok());

        let raw: RepairScript = serde_json::from_value(json!({
            "name": "codes-conseiller",
            "action": "sql",
            "sql": "UPDATE evenement_engagement SET code = ? WHERE type_utilisateur = ?",
            "params": ["INCONNU", "CONSEILLER"]
        }))
        .unwrap();
        assert!(raw.validate().is_ok());
        assert_eq!(raw.statement().params, vec![json!("INCONNU"), json!("CONSEILLER")]);
    }

    #[test]
    fn test_sql_subquery_delete_is_idempotent() {
        let store = store();
        let script = RepairScript::sql(
            "purger-doublons-jeune",
            "DELETE FROM evenement_engagement WHERE id IN \
             (SELECT id FROM evenement_engagement WHERE type_utilisateur = ? AND code IS NULL)",
            vec![json!("JEUNE")],
        );

        assert_eq!(script.run(&store).unwrap().affected_rows, 1);
        assert_eq!(script.run(&store).unwrap().affected_rows, 0);
        assert_eq!(store.count_rows("evenement_engagement").unwrap(), 2);

        let conn = store.connection().unwrap();
        let runs = RunLog::recent(&conn, REPAIR_NAMESPACE, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.outcome == Outcome::Applied));
    }

    #[test]
    fn test_sql_without_filter_rejected_before_running() {
        let store = store();
        for sql in [
            "DELETE FROM evenement_engagement",
            "UPDATE evenement_engagement SET code = (SELECT 'X' WHERE 1 = 1)",
            "SELECT * FROM evenement_engagement WHERE id = 1",
        ] {
            let err = RepairScript::sql("sans-filtre", sql, vec![]).run(&store).unwrap_err();
            assert_eq!(err.kind(), "InvalidUnit", "{}", sql);
        }
        assert_eq!(store.count_rows("evenement_engagement").unwrap(), 3);
    }
}
