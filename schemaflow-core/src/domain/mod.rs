//! Core domain model
//!
//! Units, operations and reports are pure data. Nothing here holds a
//! connection; side effects happen only through an `Executor`.

pub mod deadline;
pub mod operation;
pub mod report;
pub mod result;
pub mod unit;

pub use deadline::Deadline;
pub use operation::{ColumnSpec, ColumnType, ForeignKey, IndexOptions, Operation, Predicate, Row};
pub use report::{AppliedUnit, BatchReport, LedgerEntry, PendingUnit, StatusReport, UnitError};
pub use unit::{ChangeUnit, Direction, Namespace, SeedUnit, UnitSet};
