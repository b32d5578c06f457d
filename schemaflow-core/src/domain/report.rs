//! Batch and status reports

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::unit::{Direction, Namespace};

/// One row of a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub version: String,
    pub applied_at: DateTime<Utc>,
    /// Checksum of the unit when it was applied
    pub checksum: Option<String>,
}

/// Outcome of a batch that ran to completion (or was stopped between units)
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub namespace: Namespace,
    pub direction: Direction,
    /// Versions processed, in execution order
    pub units: Vec<String>,
    /// True when a stop request ended the batch early
    pub stopped: bool,
}

impl BatchReport {
    pub fn new(namespace: Namespace, direction: Direction) -> Self {
        Self {
            namespace,
            direction,
            units: Vec::new(),
            stopped: false,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.units.is_empty()
    }
}

/// The last recorded failure of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitError {
    pub direction: Direction,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// An applied unit as seen by `status`
#[derive(Debug, Clone, Serialize)]
pub struct AppliedUnit {
    pub version: String,
    pub applied_at: DateTime<Utc>,
    /// The authored unit changed after it was applied
    pub modified: bool,
}

/// A unit still waiting to be applied
#[derive(Debug, Clone, Serialize)]
pub struct PendingUnit {
    pub version: String,
    pub last_error: Option<UnitError>,
}

/// Applied/pending view of one namespace
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub namespace: Namespace,
    pub applied: Vec<AppliedUnit>,
    pub pending: Vec<PendingUnit>,
    /// Ledger versions with no authored unit
    pub orphaned: Vec<String>,
    /// Pending versions lower than the highest applied one
    pub gaps: Vec<String>,
}

impl StatusReport {
    pub fn is_consistent(&self) -> bool {
        self.orphaned.is_empty() && self.gaps.is_empty()
    }

    pub fn pending_unit(&self, version: &str) -> Option<&PendingUnit> {
        self.pending.iter().find(|p| p.version == version)
    }
}
