//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for the store and the transaction-bound `Executor`
//! - SQL rendering for DuckDB statements

pub mod duckdb;
pub mod sql;
