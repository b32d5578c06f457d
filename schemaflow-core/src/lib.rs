//! Schemaflow Core - versioned schema migrations and data seeds for DuckDB
//!
//! This crate implements the migration engine following hexagonal architecture:
//!
//! - **domain**: Change units, operations, reports and the error taxonomy
//! - **ports**: The `Executor` capability surface units run against
//! - **services**: Ledger, runners, repair scripts, unit file loading
//! - **adapters**: DuckDB store and statement rendering
//! - **migrations** / **seeds**: The built-in unit catalog

pub mod adapters;
pub mod config;
pub mod domain;
pub mod migrations;
pub mod ports;
pub mod seeds;
pub mod services;

use std::path::Path;

use log::debug;

use adapters::duckdb::Store;
use config::Config;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, Result};
pub use domain::{
    BatchReport, ChangeUnit, Direction, Namespace, Operation, StatusReport, UnitSet,
};

/// Main context for schemaflow operations
///
/// This is the primary entry point for callers. It holds the configuration,
/// the database store and the unit sets of both namespaces.
pub struct SchemaflowContext {
    pub config: Config,
    pub store: Store,
    pub migrations: UnitSet,
    pub seeds: UnitSet,
    stop: StopSignal,
}

impl SchemaflowContext {
    /// Create a context for a project directory
    ///
    /// Built-in units are merged with the JSON units found in the configured
    /// directories.
    pub fn new(project_dir: &Path) -> Result<Self> {
        let config = Config::load(project_dir)?;
        let store = Store::open(&config.database)?;

        let migrations = with_directory(migrations::unit_set()?, config.migrations.directory.as_deref())?;
        let seeds = with_directory(seeds::unit_set()?, config.seeds.directory.as_deref())?;

        Ok(Self::from_parts(config, store, migrations, seeds))
    }

    /// Assemble a context from already-built parts
    pub fn from_parts(config: Config, store: Store, migrations: UnitSet, seeds: UnitSet) -> Self {
        Self {
            config,
            store,
            migrations,
            seeds,
            stop: StopSignal::new(),
        }
    }

    /// Handle for requesting a stop between units
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn units(&self, namespace: Namespace) -> &UnitSet {
        match namespace {
            Namespace::Migrations => &self.migrations,
            Namespace::Seeds => &self.seeds,
        }
    }

    pub fn runner(&self, namespace: Namespace) -> Runner<'_> {
        Runner::new(
            &self.store,
            self.units(namespace),
            self.config.run_options(namespace, self.stop.clone()),
        )
    }

    pub fn migrate_up(&self, target: Option<&str>) -> Result<BatchReport> {
        self.runner(Namespace::Migrations).up(target)
    }

    /// Roll back migrations above `target`; `None` rolls back all of them
    pub fn migrate_down(&self, target: Option<&str>) -> Result<BatchReport> {
        self.runner(Namespace::Migrations).down(target)
    }

    pub fn seed_up(&self, target: Option<&str>) -> Result<BatchReport> {
        self.runner(Namespace::Seeds).up(target)
    }

    pub fn seed_down(&self, target: Option<&str>) -> Result<BatchReport> {
        self.runner(Namespace::Seeds).down(target)
    }

    pub fn status(&self, namespace: Namespace) -> Result<StatusReport> {
        self.runner(namespace).status()
    }

    pub fn repair(&self, script: &RepairScript) -> Result<RepairOutcome> {
        script.run(&self.store)
    }
}

fn with_directory(builtin: UnitSet, dir: Option<&Path>) -> Result<UnitSet> {
    match dir {
        Some(dir) => {
            let loaded = loader::load_dir(dir)?;
            debug!("Loaded {} {} units from {}", loaded.len(), builtin.namespace(), dir.display());
            builtin.extend(loaded)
        }
        None => Ok(builtin),
    }
}
