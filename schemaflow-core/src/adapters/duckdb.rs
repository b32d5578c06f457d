//! DuckDB store and executor implementation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use duckdb::{Connection, Transaction};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use super::sql::{self, Statement};
use crate::domain::result::{Error, Result};
use crate::domain::{ColumnSpec, Deadline, IndexOptions, Namespace, Predicate, Row};
use crate::ports::Executor;
use crate::services::run_log::RUN_LOG_TABLE;

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        || lower.contains("could not set lock on file")
}

/// Map the final open failure; a lock held by another process means
/// another run owns the database
fn open_error(db_path: &Path, err: Error) -> Error {
    if is_retryable_error(&err.to_string()) {
        warn!("Database {} is held by another process: {}", db_path.display(), err);
        Error::ConcurrentRunDetected(db_path.to_path_buf())
    } else {
        err
    }
}

/// Where the store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Memory,
}

/// DuckDB store: one connection, used by one batch at a time
pub struct Store {
    conn: Mutex<Connection>,
    location: Location,
}

impl Store {
    /// Open (or create) a database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when another process has the database open. If the lock
    /// is still held after the last retry this fails with
    /// `ConcurrentRunDetected`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        location: Location::File(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        warn!(
                            "Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(open_error(db_path, e));
                }
            }
        }

        Err(last_error.map(|e| open_error(db_path, e)).unwrap_or_else(|| {
            Error::database(format!("Failed to open database after {} retries", MAX_RETRIES))
        }))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: Location::Memory,
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; JSON is statically linked via the "json" feature.
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Default advisory lock file: `<database>.lock` next to the database
    pub fn default_lock_path(&self) -> Option<PathBuf> {
        match &self.location {
            Location::File(path) => {
                let mut name = path.as_os_str().to_os_string();
                name.push(".lock");
                Some(PathBuf::from(name))
            }
            Location::Memory => None,
        }
    }

    /// Exclusive access to the connection
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    /// Check whether a table exists in the main schema
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let conn = self.connection()?;
        table_exists(&conn, table_name)
    }

    /// Count rows of a table
    pub fn count_rows(&self, table_name: &str) -> Result<i64> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", sql::quote_ident(table_name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Shape of every user table: columns in order plus index names
    ///
    /// Ledger and run log tables are left out.
    pub fn schema_snapshot(&self) -> Result<SchemaSnapshot> {
        let conn = self.connection()?;
        let internal = [
            Namespace::Migrations.ledger_table(),
            Namespace::Seeds.ledger_table(),
            RUN_LOG_TABLE,
        ];

        let mut tables: BTreeMap<String, TableShape> = BTreeMap::new();

        let mut stmt = conn.prepare(
            "SELECT table_name, column_name, data_type, is_nullable
             FROM duckdb_columns()
             WHERE NOT internal AND schema_name = 'main' AND database_name = current_database()
             ORDER BY table_name, column_index",
        )?;
        let columns = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ColumnShape {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    nullable: row.get(3)?,
                },
            ))
        })?;
        for column in columns {
            let (table, shape) = column?;
            if internal.contains(&table.as_str()) {
                continue;
            }
            tables.entry(table).or_default().columns.push(shape);
        }

        let mut stmt = conn.prepare(
            "SELECT table_name, index_name
             FROM duckdb_indexes()
             WHERE schema_name = 'main' AND database_name = current_database()
             ORDER BY table_name, index_name",
        )?;
        let indexes = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for index in indexes {
            let (table, name) = index?;
            if let Some(shape) = tables.get_mut(&table) {
                shape.indexes.push(name);
            }
        }

        Ok(SchemaSnapshot { tables })
    }
}

pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables
         WHERE table_name = ? AND table_schema = 'main'",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// One column as reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnShape {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// One table: ordered columns and its index names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableShape {
    pub columns: Vec<ColumnShape>,
    pub indexes: Vec<String>,
}

/// Database shape, compared to check that forward then backward is a no-op
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableShape>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableShape> {
        self.tables.get(name)
    }
}

/// Convert JSON value to DuckDB parameter
pub(crate) fn json_to_duckdb_param(value: &Value) -> Box<dyn duckdb::ToSql> {
    match value {
        Value::Null => Box::new(None::<String>),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else if let Some(f) = n.as_f64() {
                Box::new(f)
            } else {
                Box::new(n.to_string())
            }
        }
        Value::String(s) => Box::new(s.clone()),
        // Arrays and objects go in as their JSON text
        Value::Array(_) | Value::Object(_) => Box::new(value.to_string()),
    }
}

/// Run one rendered statement, mapping failures to `ExecutionFailure`
pub(crate) fn execute_statement(conn: &Connection, statement: &Statement) -> Result<usize> {
    debug!("{} {:?}", statement.sql, statement.params);

    let params: Vec<Box<dyn duckdb::ToSql>> =
        statement.params.iter().map(json_to_duckdb_param).collect();
    let param_refs: Vec<&dyn duckdb::ToSql> = params.iter().map(|b| b.as_ref()).collect();

    conn.execute(&statement.sql, param_refs.as_slice())
        .map_err(|e| Error::ExecutionFailure {
            statement: statement.sql.clone(),
            cause: e.to_string(),
        })
}

/// Executor bound to one open DuckDB transaction
///
/// Checks the unit's deadline before every statement.
pub struct TxnExecutor<'t, 'c> {
    txn: &'t Transaction<'c>,
    deadline: Deadline,
    issued: usize,
}

impl<'t, 'c> TxnExecutor<'t, 'c> {
    pub fn new(txn: &'t Transaction<'c>, deadline: Deadline) -> Self {
        Self {
            txn,
            deadline,
            issued: 0,
        }
    }

    /// Number of statements issued so far
    pub fn issued(&self) -> usize {
        self.issued
    }

    fn run(&mut self, statement: &Statement) -> Result<usize> {
        self.deadline.check()?;
        let affected = execute_statement(self.txn, statement)?;
        self.issued += 1;
        Ok(affected)
    }

    fn run_all(&mut self, statements: &[Statement]) -> Result<usize> {
        let mut affected = 0;
        for statement in statements {
            affected += self.run(statement)?;
        }
        Ok(affected)
    }
}

impl Executor for TxnExecutor<'_, '_> {
    fn add_column(&mut self, table: &str, column: &ColumnSpec) -> Result<()> {
        self.run_all(&sql::add_column(table, column)).map(|_| ())
    }

    fn remove_column(&mut self, table: &str, column: &str) -> Result<()> {
        self.run(&sql::remove_column(table, column)).map(|_| ())
    }

    fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        self.run(&sql::rename_column(table, from, to)).map(|_| ())
    }

    fn change_nullability(&mut self, table: &str, column: &str, nullable: bool) -> Result<()> {
        self.run(&sql::change_nullability(table, column, nullable))
            .map(|_| ())
    }

    fn create_table(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<()> {
        self.run(&sql::create_table(table, columns)).map(|_| ())
    }

    fn drop_table(&mut self, table: &str) -> Result<()> {
        self.run(&sql::drop_table(table)).map(|_| ())
    }

    fn add_index(&mut self, table: &str, columns: &[String], options: &IndexOptions) -> Result<()> {
        self.run(&sql::add_index(table, columns, options)).map(|_| ())
    }

    fn remove_index(&mut self, _table: &str, name: &str) -> Result<()> {
        self.run(&sql::remove_index(name)).map(|_| ())
    }

    fn bulk_insert(&mut self, table: &str, rows: &[Row]) -> Result<usize> {
        let statements: Vec<Statement> = rows.iter().map(|row| sql::insert(table, row)).collect();
        self.run_all(&statements)
    }

    fn bulk_delete(&mut self, table: &str, predicate: &Predicate) -> Result<usize> {
        self.run(&sql::delete(table, predicate))
    }

    fn raw_sql(&mut self, statement: &str, params: &[Value]) -> Result<usize> {
        self.run(&Statement {
            sql: statement.to_string(),
            params: params.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnType, Operation};
    use serde_json::json;

    fn store_with_table() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .connection()
            .unwrap()
            .execute_batch("CREATE TABLE agence (id VARCHAR PRIMARY KEY, code_departement VARCHAR)")
            .unwrap();
        store
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("IO Error: Could not set lock on file"));
        assert!(is_retryable_error("The process cannot access the file"));
        assert!(!is_retryable_error("Parser Error: syntax error at or near"));
    }

    #[test]
    fn test_lock_conflict_maps_to_concurrent_run() {
        let path = Path::new("/tmp/app.duckdb");
        let held = Error::database(
            "IO Error: Could not set lock on file \"/tmp/app.duckdb\": Conflicting lock is held",
        );
        let err = open_error(path, held);
        assert_eq!(err.kind(), "ConcurrentRunDetected");
        assert!(err.to_string().contains("app.duckdb"));

        let other = open_error(path, Error::database("Catalog Error: no such table"));
        assert_eq!(other.kind(), "Database");
    }

    #[test]
    fn test_default_lock_path() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.location(), &Location::Memory);
        assert!(store.default_lock_path().is_none());
    }

    #[test]
    fn test_executor_runs_inside_transaction() {
        let store = store_with_table();
        {
            let mut conn = store.connection().unwrap();
            let txn = conn.transaction().unwrap();
            let mut exec = TxnExecutor::new(&txn, Deadline::unlimited());
            let rows: Vec<Row> = vec![
                json!({ "id": "a", "code_departement": "1" }).as_object().unwrap().clone(),
                json!({ "id": "b", "code_departement": "2" }).as_object().unwrap().clone(),
            ];
            assert_eq!(exec.bulk_insert("agence", &rows).unwrap(), 2);
            assert_eq!(exec.issued(), 2);
            // Dropped without commit
        }
        assert_eq!(store.count_rows("agence").unwrap(), 0);
    }

    #[test]
    fn test_statement_failure_carries_statement() {
        let store = store_with_table();
        let mut conn = store.connection().unwrap();
        let txn = conn.transaction().unwrap();
        let mut exec = TxnExecutor::new(&txn, Deadline::unlimited());

        let err = exec.drop_table("missing").unwrap_err();
        match err {
            Error::ExecutionFailure { statement, .. } => {
                assert_eq!(statement, "DROP TABLE \"missing\"");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_expired_deadline_blocks_statements() {
        let store = store_with_table();
        let mut conn = store.connection().unwrap();
        let txn = conn.transaction().unwrap();
        let deadline = Deadline::start(Some(Duration::ZERO));
        thread::sleep(Duration::from_millis(2));
        let mut exec = TxnExecutor::new(&txn, deadline);

        let err = exec.raw_sql("DELETE FROM agence", &[]).unwrap_err();
        assert_eq!(err.kind(), "ExecutionTimeout");
        assert_eq!(exec.issued(), 0);
    }

    #[test]
    fn test_snapshot_sees_operations() {
        let store = store_with_table();
        {
            let mut conn = store.connection().unwrap();
            let txn = conn.transaction().unwrap();
            let mut exec = TxnExecutor::new(&txn, Deadline::unlimited());
            Operation::add_column("agence", ColumnSpec::new("nom_agence", ColumnType::Varchar(None)))
                .run(&mut exec)
                .unwrap();
            txn.commit().unwrap();
        }

        let snapshot = store.schema_snapshot().unwrap();
        let agence = snapshot.table("agence").unwrap();
        let names: Vec<&str> = agence.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "code_departement", "nom_agence"]);
        assert!(agence.columns[2].nullable);
    }

    #[test]
    fn test_table_exists() {
        let store = store_with_table();
        assert!(store.table_exists("agence").unwrap());
        assert!(!store.table_exists("structure_milo").unwrap());
    }
}
