//! Operation model - one schema or data change, described as data
//!
//! An `Operation` is inert until it is run against an `Executor`. Each
//! variant maps onto exactly one capability of the executor, except
//! `Batch` (runs its children in order), `Noop` and `Irreversible`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlparser::ast::Statement as SqlStatement;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use super::result::{Error, Result};
use crate::ports::Executor;

/// One row for `bulk_insert`: column name to value
pub type Row = serde_json::Map<String, Value>;

/// Column data type
///
/// Serialized as its SQL spelling, e.g. `"varchar(512)"` or `"timestamp"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Varchar(Option<u32>),
    Text,
    Integer,
    BigInt,
    Boolean,
    Double,
    Timestamp,
    Date,
    Uuid,
    Json,
}

impl ColumnType {
    /// DuckDB spelling of the type
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Varchar(Some(len)) => format!("VARCHAR({})", len),
            ColumnType::Varchar(None) => "VARCHAR".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Json => "JSON".to_string(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Varchar(Some(len)) => write!(f, "varchar({})", len),
            ColumnType::Varchar(None) => write!(f, "varchar"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Uuid => write!(f, "uuid"),
            ColumnType::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();

        if let Some(rest) = lower.strip_prefix("varchar(") {
            let len = rest
                .strip_suffix(')')
                .and_then(|n| n.trim().parse::<u32>().ok())
                .ok_or_else(|| Error::invalid_unit(format!("bad varchar length in '{}'", s)))?;
            return Ok(ColumnType::Varchar(Some(len)));
        }

        match lower.as_str() {
            "varchar" | "string" => Ok(ColumnType::Varchar(None)),
            "text" => Ok(ColumnType::Text),
            "integer" | "int" => Ok(ColumnType::Integer),
            "bigint" => Ok(ColumnType::BigInt),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "double" => Ok(ColumnType::Double),
            "timestamp" | "datetime" => Ok(ColumnType::Timestamp),
            "date" => Ok(ColumnType::Date),
            "uuid" => Ok(ColumnType::Uuid),
            "json" => Ok(ColumnType::Json),
            _ => Err(Error::invalid_unit(format!("unknown column type '{}'", s))),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

/// Foreign key target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

fn default_true() -> bool {
    true
}

/// Column definition used by `create_table` and `add_column`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKey>,
}

impl ColumnSpec {
    /// A nullable column with no constraints
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

/// Options for `add_index`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Index name; defaults to `<table>_<col1>_<col2>...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexOptions {
    /// Resolve the index name for a table and column list
    pub fn resolved_name(&self, table: &str, columns: &[String]) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}", table, columns.join("_")),
        }
    }
}

/// Row filter for `bulk_delete` and repair scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every row
    All,
    Eq { column: String, value: Value },
    IsNull { column: String },
    NotNull { column: String },
    In { column: String, values: Vec<Value> },
    And { all: Vec<Predicate> },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull {
            column: column.into(),
        }
    }

    pub fn and(all: Vec<Predicate>) -> Self {
        Predicate::And { all }
    }

    /// True when the predicate filters nothing out
    pub fn matches_everything(&self) -> bool {
        match self {
            Predicate::All => true,
            Predicate::And { all } => all.iter().all(|p| p.matches_everything()),
            _ => false,
        }
    }
}

/// One schema or data change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    RemoveColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    ChangeNullability {
        table: String,
        column: String,
        nullable: bool,
    },
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    DropTable {
        table: String,
    },
    AddIndex {
        table: String,
        columns: Vec<String>,
        #[serde(default)]
        options: IndexOptions,
    },
    RemoveIndex {
        table: String,
        name: String,
    },
    BulkInsert {
        table: String,
        rows: Vec<Row>,
    },
    BulkDelete {
        table: String,
        predicate: Predicate,
    },
    RawSql {
        sql: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Value>,
    },
    Batch {
        ops: Vec<Operation>,
    },
    Noop,
    Irreversible {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Operation {
    pub fn add_column(table: impl Into<String>, column: ColumnSpec) -> Self {
        Operation::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn rename_column(
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Operation::RenameColumn {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn create_table(table: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Operation::CreateTable {
            table: table.into(),
            columns,
        }
    }

    pub fn drop_table(table: impl Into<String>) -> Self {
        Operation::DropTable {
            table: table.into(),
        }
    }

    pub fn add_index(table: impl Into<String>, columns: &[&str], options: IndexOptions) -> Self {
        Operation::AddIndex {
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            options,
        }
    }

    pub fn bulk_insert(table: impl Into<String>, rows: Vec<Row>) -> Self {
        Operation::BulkInsert {
            table: table.into(),
            rows,
        }
    }

    pub fn bulk_delete(table: impl Into<String>, predicate: Predicate) -> Self {
        Operation::BulkDelete {
            table: table.into(),
            predicate,
        }
    }

    pub fn raw_sql(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Operation::RawSql {
            sql: sql.into(),
            params,
        }
    }

    pub fn irreversible(reason: impl Into<String>) -> Self {
        Operation::Irreversible {
            reason: Some(reason.into()),
        }
    }

    /// The exact inverse of this operation, when one can be derived
    ///
    /// Only the constructive half of each pair carries enough information:
    /// `add_column` inverts to `remove_column` but not the other way round.
    ///
    /// `change_nullability` inverts to the opposite setting, which assumes
    /// the forward half actually flipped the column. Setting NOT NULL on a
    /// column that was already NOT NULL derives a backward that drops the
    /// constraint, leaving the column looser than before the unit ran.
    /// Write an explicit backward in that case.
    pub fn inverse(&self) -> Option<Operation> {
        match self {
            Operation::AddColumn { table, column } => Some(Operation::RemoveColumn {
                table: table.clone(),
                column: column.name.clone(),
            }),
            Operation::RenameColumn { table, from, to } => Some(Operation::RenameColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            }),
            Operation::ChangeNullability {
                table,
                column,
                nullable,
            } => Some(Operation::ChangeNullability {
                table: table.clone(),
                column: column.clone(),
                nullable: !nullable,
            }),
            Operation::CreateTable { table, .. } => Some(Operation::DropTable {
                table: table.clone(),
            }),
            Operation::AddIndex {
                table,
                columns,
                options,
            } => Some(Operation::RemoveIndex {
                table: table.clone(),
                name: options.resolved_name(table, columns),
            }),
            Operation::Batch { ops } => {
                let inverted = ops
                    .iter()
                    .rev()
                    .map(|op| op.inverse())
                    .collect::<Option<Vec<_>>>()?;
                Some(Operation::Batch { ops: inverted })
            }
            Operation::Noop => Some(Operation::Noop),
            Operation::RemoveColumn { .. }
            | Operation::DropTable { .. }
            | Operation::RemoveIndex { .. }
            | Operation::BulkInsert { .. }
            | Operation::BulkDelete { .. }
            | Operation::RawSql { .. }
            | Operation::Irreversible { .. } => None,
        }
    }

    /// Check the operation is well formed before any batch runs
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::CreateTable { table, columns } if columns.is_empty() => Err(
                Error::invalid_unit(format!("create_table '{}' has no columns", table)),
            ),
            Operation::AddIndex { table, columns, .. } if columns.is_empty() => Err(
                Error::invalid_unit(format!("add_index on '{}' has no columns", table)),
            ),
            Operation::AddColumn { table, column } => {
                let constraint = if column.primary_key {
                    Some("a primary key")
                } else if column.unique {
                    Some("a unique constraint")
                } else if column.references.is_some() {
                    Some("a foreign key")
                } else {
                    None
                };
                match constraint {
                    Some(constraint) => Err(Error::invalid_unit(format!(
                        "add_column '{}.{}' cannot carry {}; use create_table or add_index",
                        table, column.name, constraint
                    ))),
                    None => Ok(()),
                }
            }
            Operation::RawSql { sql, .. } => validate_sql_syntax(sql),
            Operation::Batch { ops } => ops.iter().try_for_each(|op| op.validate()),
            _ => Ok(()),
        }
    }

    /// Run the operation through an executor
    pub fn run(&self, executor: &mut dyn Executor) -> Result<()> {
        match self {
            Operation::AddColumn { table, column } => executor.add_column(table, column),
            Operation::RemoveColumn { table, column } => executor.remove_column(table, column),
            Operation::RenameColumn { table, from, to } => {
                executor.rename_column(table, from, to)
            }
            Operation::ChangeNullability {
                table,
                column,
                nullable,
            } => executor.change_nullability(table, column, *nullable),
            Operation::CreateTable { table, columns } => executor.create_table(table, columns),
            Operation::DropTable { table } => executor.drop_table(table),
            Operation::AddIndex {
                table,
                columns,
                options,
            } => executor.add_index(table, columns, options),
            Operation::RemoveIndex { table, name } => executor.remove_index(table, name),
            Operation::BulkInsert { table, rows } => executor.bulk_insert(table, rows).map(|_| ()),
            Operation::BulkDelete { table, predicate } => {
                executor.bulk_delete(table, predicate).map(|_| ())
            }
            Operation::RawSql { sql, params } => executor.raw_sql(sql, params).map(|_| ()),
            Operation::Batch { ops } => ops.iter().try_for_each(|op| op.run(executor)),
            Operation::Noop => Ok(()),
            Operation::Irreversible { reason } => Err(Error::IrreversibleChange(
                reason
                    .clone()
                    .unwrap_or_else(|| "operation declares no inverse".to_string()),
            )),
        }
    }
}

fn parse_sql(sql: &str) -> Result<Vec<SqlStatement>> {
    let dialect = DuckDbDialect {};
    let statements = Parser::parse_sql(&dialect, sql).map_err(|e| {
        let msg = e.to_string();
        let cleaned = msg.trim_start_matches("sql parser error: ");
        Error::invalid_unit(format!("{} in '{}'", cleaned, sql))
    })?;
    if statements.is_empty() {
        return Err(Error::invalid_unit("empty SQL statement"));
    }
    Ok(statements)
}

/// Validate SQL syntax before execution to catch malformed statements early.
pub fn validate_sql_syntax(sql: &str) -> Result<()> {
    parse_sql(sql).map(|_| ())
}

/// Accept exactly one DELETE or UPDATE that has a WHERE clause
///
/// The clause is read from the parsed statement, so a `WHERE` inside a
/// subquery or a string literal does not count.
pub fn require_filtered_statement(sql: &str) -> Result<()> {
    let statements = parse_sql(sql)?;
    let [statement] = statements.as_slice() else {
        return Err(Error::invalid_unit(format!(
            "expected one statement, found {}",
            statements.len()
        )));
    };
    let filtered = match statement {
        SqlStatement::Delete(delete) => delete.selection.is_some(),
        SqlStatement::Update(update) => update.selection.is_some(),
        _ => {
            return Err(Error::invalid_unit(format!(
                "only DELETE or UPDATE is allowed, got '{}'",
                sql
            )))
        }
    };
    if !filtered {
        return Err(Error::invalid_unit(format!(
            "'{}' has no WHERE clause; an explicit filter is required",
            sql
        )));
    }
    Ok(())
}
