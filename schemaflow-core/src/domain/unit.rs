//! Change units and unit sets
//!
//! A `ChangeUnit` pairs a forward and a backward `Operation` under a version
//! stamp. Units are immutable once authored; a `UnitSet` holds the units of
//! one namespace sorted by version.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::operation::Operation;
use super::result::{Error, Result};
use crate::ports::Executor;

/// Which way a unit is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger namespace: schema migrations and data seeds are tracked apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Migrations,
    Seeds,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Migrations => "migrations",
            Namespace::Seeds => "seeds",
        }
    }

    /// Name of the ledger table backing this namespace
    pub fn ledger_table(&self) -> &'static str {
        match self {
            Namespace::Migrations => "schema_migrations",
            Namespace::Seeds => "schema_seeds",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One versioned, reversible transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeUnit {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub forward: Operation,
    pub backward: Operation,
}

/// Seed units share the change unit shape; the namespace keeps them apart.
pub type SeedUnit = ChangeUnit;

impl ChangeUnit {
    /// Create a unit with an explicit backward operation
    pub fn new(version: impl Into<String>, forward: Operation, backward: Operation) -> Self {
        Self {
            version: version.into(),
            description: None,
            forward,
            backward,
        }
    }

    /// Create a unit whose backward operation is the derived inverse of `forward`
    pub fn reversible(version: impl Into<String>, forward: Operation) -> Result<Self> {
        let version = version.into();
        let backward = forward.inverse().ok_or_else(|| {
            Error::invalid_unit(format!(
                "{}: forward operation has no derivable inverse",
                version
            ))
        })?;
        Ok(Self::new(version, forward, backward))
    }

    /// Create a data-only unit that refuses to run backward
    pub fn irreversible(version: impl Into<String>, forward: Operation) -> Self {
        let version = version.into();
        let backward = Operation::irreversible(format!("{} is a one-way data change", version));
        Self::new(version, forward, backward)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Run the unit in the given direction
    pub fn apply(&self, direction: Direction, executor: &mut dyn Executor) -> Result<()> {
        match direction {
            Direction::Forward => self.forward.run(executor),
            Direction::Backward => self.backward.run(executor),
        }
    }

    /// Content checksum (hex SHA-256 of the canonical JSON form)
    pub fn checksum(&self) -> String {
        let canonical = serde_json::to_vec(&(&self.forward, &self.backward)).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

/// Check a version stamp is usable as a sortable ledger key
pub fn validate_version(version: &str) -> Result<()> {
    let version_re = Regex::new(r"^[0-9A-Za-z][0-9A-Za-z._-]*$").unwrap();
    if version_re.is_match(version) {
        Ok(())
    } else {
        Err(Error::invalid_unit(format!(
            "version '{}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
            version
        )))
    }
}

/// The authored units of one namespace, sorted ascending by version
#[derive(Debug, Clone)]
pub struct UnitSet {
    namespace: Namespace,
    units: Vec<ChangeUnit>,
}

impl UnitSet {
    /// Build a validated unit set
    ///
    /// Rejects malformed or duplicate versions and malformed operations.
    pub fn new(namespace: Namespace, mut units: Vec<ChangeUnit>) -> Result<Self> {
        let mut seen = HashSet::new();
        for unit in &units {
            validate_version(&unit.version)?;
            if !seen.insert(unit.version.as_str()) {
                return Err(Error::invalid_unit(format!(
                    "duplicate version '{}' in {}",
                    unit.version, namespace
                )));
            }
            unit.forward
                .validate()
                .and_then(|_| unit.backward.validate())
                .map_err(|e| Error::invalid_unit(format!("{}: {}", unit.version, e)))?;
        }

        units.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(Self { namespace, units })
    }

    /// Merge more units into this set, revalidating the whole
    pub fn extend(self, more: Vec<ChangeUnit>) -> Result<Self> {
        let mut units = self.units;
        units.extend(more);
        Self::new(self.namespace, units)
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn get(&self, version: &str) -> Option<&ChangeUnit> {
        self.units
            .binary_search_by(|u| u.version.as_str().cmp(version))
            .ok()
            .map(|idx| &self.units[idx])
    }

    pub fn contains(&self, version: &str) -> bool {
        self.get(version).is_some()
    }

    /// Look up a version that must exist
    pub fn require(&self, version: &str) -> Result<&ChangeUnit> {
        self.get(version)
            .ok_or_else(|| Error::UnknownVersion(format!("{} has no unit '{}'", self.namespace, version)))
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.version.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Latest known version
    pub fn latest(&self) -> Option<&str> {
        self.units.last().map(|u| u.version.as_str())
    }
}
