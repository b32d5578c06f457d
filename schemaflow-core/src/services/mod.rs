//! Service layer - batch orchestration
//!
//! Services coordinate units, ledgers and the store. Each service focuses
//! on one use case: running a namespace, repairing data, loading units.

mod ledger;
pub mod loader;
mod lock;
mod repair;
pub mod run_log;
mod runner;

pub use ledger::Ledger;
pub use lock::{BatchLock, StopSignal};
pub use repair::{RepairAction, RepairOutcome, RepairScript, REPAIR_NAMESPACE};
pub use run_log::{Outcome, RunEvent, RunLog, RunLogEntry};
pub use runner::{
    check_consistency, find_gaps, find_orphans, plan_down, plan_up, RunOptions, Runner,
};

/// Runner over the `Migrations` namespace
pub type MigrationRunner<'a> = Runner<'a>;

/// Runner over the `Seeds` namespace
pub type SeedRunner<'a> = Runner<'a>;
