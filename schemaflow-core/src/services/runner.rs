//! Runner - ordered application and rollback of units
//!
//! Each unit runs in its own transaction together with its ledger update.
//! A batch stops at the first failure; the failed unit's transaction is
//! rolled back and later units are never attempted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use duckdb::Connection;
use log::{error, info, warn};

use super::ledger::Ledger;
use super::lock::{BatchLock, StopSignal};
use super::run_log::{Outcome, RunEvent, RunLog};
use crate::adapters::duckdb::{Store, TxnExecutor};
use crate::domain::result::{Error, Result};
use crate::domain::{
    AppliedUnit, BatchReport, ChangeUnit, Deadline, Direction, LedgerEntry, PendingUnit,
    StatusReport, UnitSet,
};

/// Batch settings
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Allow applying a unit below the highest applied version
    pub allow_out_of_order: bool,
    /// Per-unit time budget
    pub unit_timeout: Option<Duration>,
    /// Advisory lock file; falls back to the store's default
    pub lock_path: Option<PathBuf>,
    pub stop: StopSignal,
}

impl RunOptions {
    pub fn allow_out_of_order(mut self, allow: bool) -> Self {
        self.allow_out_of_order = allow;
        self
    }

    pub fn unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn lock_path(mut self, path: Option<PathBuf>) -> Self {
        self.lock_path = path;
        self
    }

    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }
}

/// Ledger versions that have no authored unit
pub fn find_orphans(units: &UnitSet, applied: &[String]) -> Vec<String> {
    applied
        .iter()
        .filter(|v| !units.contains(v))
        .cloned()
        .collect()
}

/// Unapplied units that sort below the highest applied version
pub fn find_gaps(units: &UnitSet, applied: &[String]) -> Vec<String> {
    let Some(head) = applied.iter().filter(|v| units.contains(v)).max() else {
        return Vec::new();
    };
    let applied: HashSet<&str> = applied.iter().map(|v| v.as_str()).collect();
    units
        .versions()
        .filter(|v| *v < head.as_str() && !applied.contains(v))
        .map(|v| v.to_string())
        .collect()
}

/// Check the ledger against the authored units before a batch
pub fn check_consistency(units: &UnitSet, applied: &[String], allow_out_of_order: bool) -> Result<()> {
    let orphans = find_orphans(units, applied);
    if !orphans.is_empty() {
        return Err(Error::inconsistency(format!(
            "{} ledger has versions with no known unit: {}",
            units.namespace(),
            orphans.join(", ")
        )));
    }

    if !allow_out_of_order {
        let gaps = find_gaps(units, applied);
        if !gaps.is_empty() {
            return Err(Error::inconsistency(format!(
                "{} ledger has gaps; unapplied below the applied head: {}",
                units.namespace(),
                gaps.join(", ")
            )));
        }
    }

    Ok(())
}

/// Units to apply, ascending, up to and including `target`
pub fn plan_up<'u>(units: &'u UnitSet, applied: &[String], target: Option<&str>) -> Vec<&'u ChangeUnit> {
    let applied: HashSet<&str> = applied.iter().map(|v| v.as_str()).collect();
    units
        .iter()
        .filter(|u| !applied.contains(u.version.as_str()))
        .filter(|u| target.map_or(true, |t| u.version.as_str() <= t))
        .collect()
}

/// Units to roll back, descending, strictly above `target` (`None`: all)
pub fn plan_down<'u>(units: &'u UnitSet, applied: &[String], target: Option<&str>) -> Vec<&'u ChangeUnit> {
    let mut plan: Vec<&ChangeUnit> = applied
        .iter()
        .filter(|v| target.map_or(true, |t| v.as_str() > t))
        .filter_map(|v| units.get(v))
        .collect();
    plan.sort_by(|a, b| b.version.cmp(&a.version));
    plan
}

/// Runs one namespace's units against a store
pub struct Runner<'a> {
    store: &'a Store,
    units: &'a UnitSet,
    ledger: Ledger,
    options: RunOptions,
}

impl<'a> Runner<'a> {
    pub fn new(store: &'a Store, units: &'a UnitSet, options: RunOptions) -> Self {
        Self {
            store,
            units,
            ledger: Ledger::new(units.namespace()),
            options,
        }
    }

    /// Apply pending units in ascending order, up to `target` (default: latest)
    pub fn up(&self, target: Option<&str>) -> Result<BatchReport> {
        if let Some(t) = target {
            self.units.require(t)?;
        }

        let _lock = self.acquire_lock()?;
        let mut conn = self.store.connection()?;
        self.prepare(&conn)?;

        let applied = self.ledger.applied_versions(&conn)?;
        check_consistency(self.units, &applied, self.options.allow_out_of_order)?;
        self.warn_modified(&conn)?;

        let plan = plan_up(self.units, &applied, target);
        self.run_batch(&mut conn, plan, Direction::Forward)
    }

    /// Roll back applied units above `target` in descending order (`None`: all)
    pub fn down(&self, target: Option<&str>) -> Result<BatchReport> {
        if let Some(t) = target {
            self.units.require(t)?;
        }

        let _lock = self.acquire_lock()?;
        let mut conn = self.store.connection()?;
        self.prepare(&conn)?;

        let applied = self.ledger.applied_versions(&conn)?;
        check_consistency(self.units, &applied, self.options.allow_out_of_order)?;

        let plan = plan_down(self.units, &applied, target);
        self.run_batch(&mut conn, plan, Direction::Backward)
    }

    /// Applied and pending units, with the last error of each pending unit
    ///
    /// Reports inconsistencies instead of failing on them.
    pub fn status(&self) -> Result<StatusReport> {
        let conn = self.store.connection()?;
        self.prepare(&conn)?;

        let entries = self.ledger.list_applied(&conn)?;
        let applied: Vec<String> = entries.iter().map(|e| e.version.clone()).collect();
        let latest = RunLog::latest_by_version(&conn, self.units.namespace().as_str())?;

        let applied_units = entries
            .iter()
            .map(|entry| AppliedUnit {
                version: entry.version.clone(),
                applied_at: entry.applied_at,
                modified: self.is_modified(entry),
            })
            .collect();

        let pending = plan_up(self.units, &applied, None)
            .into_iter()
            .map(|unit| PendingUnit {
                version: unit.version.clone(),
                last_error: latest.get(&unit.version).and_then(|e| e.unit_error()),
            })
            .collect();

        Ok(StatusReport {
            namespace: self.units.namespace(),
            applied: applied_units,
            pending,
            orphaned: find_orphans(self.units, &applied),
            gaps: find_gaps(self.units, &applied),
        })
    }

    fn prepare(&self, conn: &Connection) -> Result<()> {
        self.ledger.ensure(conn)?;
        RunLog::ensure(conn)
    }

    fn acquire_lock(&self) -> Result<Option<BatchLock>> {
        let path = self
            .options
            .lock_path
            .clone()
            .or_else(|| self.store.default_lock_path());
        path.map(|p| BatchLock::acquire(&p)).transpose()
    }

    fn is_modified(&self, entry: &LedgerEntry) -> bool {
        match (self.units.get(&entry.version), &entry.checksum) {
            (Some(unit), Some(recorded)) => unit.checksum() != *recorded,
            _ => false,
        }
    }

    fn warn_modified(&self, conn: &Connection) -> Result<()> {
        for entry in self.ledger.list_applied(conn)? {
            if self.is_modified(&entry) {
                warn!(
                    "{} {} changed after it was applied",
                    self.units.namespace(),
                    entry.version
                );
            }
        }
        Ok(())
    }

    fn run_batch(
        &self,
        conn: &mut Connection,
        plan: Vec<&ChangeUnit>,
        direction: Direction,
    ) -> Result<BatchReport> {
        let namespace = self.units.namespace();
        let mut report = BatchReport::new(namespace, direction);

        if plan.is_empty() {
            info!("No {} units to run {}", namespace, direction);
            return Ok(report);
        }

        info!("Running {} {} units {}", plan.len(), namespace, direction);

        for unit in plan {
            if self.options.stop.is_raised() {
                info!("Stop requested; {} not started", unit.version);
                report.stopped = true;
                break;
            }

            if let Err(e) = self.run_unit(conn, unit, direction) {
                error!("{} {} {} failed: {}", namespace, unit.version, direction, e);
                let event = RunEvent::new(namespace.as_str(), &unit.version, direction, Outcome::Failed)
                    .with_error(e.kind(), e.to_string());
                if let Err(log_err) = RunLog::record(conn, &event) {
                    warn!("Could not record failure of {}: {}", unit.version, log_err);
                }
                return Err(Error::UnitFailed {
                    version: unit.version.clone(),
                    direction,
                    source: Box::new(e),
                });
            }

            info!("{} {} {}", namespace, unit.version, match direction {
                Direction::Forward => "applied",
                Direction::Backward => "rolled back",
            });
            report.units.push(unit.version.clone());
        }

        Ok(report)
    }

    /// One unit: execute, update the ledger, commit; or roll back everything
    fn run_unit(&self, conn: &mut Connection, unit: &ChangeUnit, direction: Direction) -> Result<()> {
        let deadline = Deadline::start(self.options.unit_timeout);
        let txn = conn.transaction()?;

        let outcome = (|| {
            let mut executor = TxnExecutor::new(&txn, deadline);
            unit.apply(direction, &mut executor)?;

            let namespace = self.units.namespace().as_str();
            match direction {
                Direction::Forward => {
                    self.ledger.record_applied(&txn, &unit.version, &unit.checksum())?;
                    RunLog::record(
                        &txn,
                        &RunEvent::new(namespace, &unit.version, direction, Outcome::Applied),
                    )?;
                }
                Direction::Backward => {
                    self.ledger.record_rolled_back(&txn, &unit.version)?;
                    RunLog::record(
                        &txn,
                        &RunEvent::new(namespace, &unit.version, direction, Outcome::RolledBack),
                    )?;
                }
            }
            deadline.check()
        })();

        match outcome {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback() {
                    warn!("Rollback of {} failed: {}", unit.version, rollback_err);
                }
                Err(e)
            }
        }
    }
}
