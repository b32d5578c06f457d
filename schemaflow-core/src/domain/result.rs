//! Result and error types for the core library

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::unit::Direction;

/// Core library error type
///
/// The first five variants are the failure taxonomy a batch can end with.
/// `UnitFailed` wraps one of them with the unit that raised it.
#[derive(Error, Debug)]
pub enum Error {
    #[error("statement rejected: {cause} (statement: {statement})")]
    ExecutionFailure { statement: String, cause: String },

    #[error("no inverse available: {0}")]
    IrreversibleChange(String),

    #[error("ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    #[error("unit ran for {elapsed:?}, over its {limit:?} limit")]
    ExecutionTimeout { elapsed: Duration, limit: Duration },

    #[error("another run holds the lock at {}", .0.display())]
    ConcurrentRunDetected(PathBuf),

    #[error("{version} {direction} failed [{}]", .source.kind())]
    UnitFailed {
        version: String,
        direction: Direction,
        source: Box<Error>,
    },

    #[error("Unknown version: {0}")]
    UnknownVersion(String),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a ledger inconsistency error
    pub fn inconsistency(msg: impl Into<String>) -> Self {
        Self::LedgerInconsistency(msg.into())
    }

    /// Create an invalid unit error
    pub fn invalid_unit(msg: impl Into<String>) -> Self {
        Self::InvalidUnit(msg.into())
    }

    /// Stable name of the error kind, as shown to operators
    ///
    /// `UnitFailed` reports the kind of the error it wraps.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutionFailure { .. } => "ExecutionFailure",
            Self::IrreversibleChange(_) => "IrreversibleChange",
            Self::LedgerInconsistency(_) => "LedgerInconsistency",
            Self::ExecutionTimeout { .. } => "ExecutionTimeout",
            Self::ConcurrentRunDetected(_) => "ConcurrentRunDetected",
            Self::UnitFailed { source, .. } => source.kind(),
            Self::UnknownVersion(_) => "UnknownVersion",
            Self::InvalidUnit(_) => "InvalidUnit",
            Self::Config(_) => "Config",
            Self::Database(_) => "Database",
            Self::Io(_) => "Io",
        }
    }

    /// The error a `UnitFailed` wraps, or the error itself
    pub fn root(&self) -> &Error {
        match self {
            Self::UnitFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
