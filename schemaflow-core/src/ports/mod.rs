//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. Units depend only
//! on these traits, not on the DuckDB adapter.

mod executor;

pub use executor::Executor;
