//! Executor port - the capability surface a unit runs against

use serde_json::Value;

use crate::domain::result::Result;
use crate::domain::{ColumnSpec, IndexOptions, Predicate, Row};

/// Schema and data capabilities available to a running unit
///
/// An executor is bound to exactly one open transaction for its whole
/// lifetime; every call issues statements inside that transaction.
pub trait Executor {
    // === Schema ===

    fn add_column(&mut self, table: &str, column: &ColumnSpec) -> Result<()>;

    fn remove_column(&mut self, table: &str, column: &str) -> Result<()>;

    fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<()>;

    /// Toggle NOT NULL on an existing column
    fn change_nullability(&mut self, table: &str, column: &str, nullable: bool) -> Result<()>;

    fn create_table(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<()>;

    fn drop_table(&mut self, table: &str) -> Result<()>;

    fn add_index(&mut self, table: &str, columns: &[String], options: &IndexOptions) -> Result<()>;

    fn remove_index(&mut self, table: &str, name: &str) -> Result<()>;

    // === Data ===

    /// Insert rows, returning how many were written
    fn bulk_insert(&mut self, table: &str, rows: &[Row]) -> Result<usize>;

    /// Delete matching rows, returning how many were removed
    fn bulk_delete(&mut self, table: &str, predicate: &Predicate) -> Result<usize>;

    /// Run a raw statement with positional parameters
    fn raw_sql(&mut self, statement: &str, params: &[Value]) -> Result<usize>;
}
