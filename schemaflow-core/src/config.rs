//! Configuration management
//!
//! Settings live in `schemaflow.json` in the project directory:
//! ```json
//! {
//!   "database": "app.duckdb",
//!   "lockFile": "app.duckdb.lock",
//!   "migrations": { "allowOutOfOrder": false, "unitTimeoutSecs": 300, "directory": "migrations" },
//!   "seeds": { "directory": "seeds" }
//! }
//! ```
//! Every field is optional. Relative paths resolve against the project
//! directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::domain::Namespace;
use crate::services::{RunOptions, StopSignal};

pub const SETTINGS_FILE: &str = "schemaflow.json";
pub const DEFAULT_DATABASE: &str = "schemaflow.duckdb";

/// Raw schemaflow.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SettingsFile {
    #[serde(default)]
    database: Option<PathBuf>,
    #[serde(default)]
    lock_file: Option<PathBuf>,
    #[serde(default)]
    migrations: NamespaceSection,
    #[serde(default)]
    seeds: NamespaceSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NamespaceSection {
    #[serde(default)]
    allow_out_of_order: Option<bool>,
    #[serde(default)]
    unit_timeout_secs: Option<u64>,
    #[serde(default)]
    directory: Option<PathBuf>,
}

/// Per-namespace runner settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub allow_out_of_order: bool,
    pub unit_timeout: Option<Duration>,
    /// Directory of JSON unit files merged with the built-in units
    pub directory: Option<PathBuf>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub database: PathBuf,
    pub lock_file: Option<PathBuf>,
    pub migrations: NamespaceConfig,
    pub seeds: NamespaceConfig,
}

impl Config {
    /// Project directory: `SCHEMAFLOW_DIR`, else the current directory
    pub fn default_dir() -> Result<PathBuf> {
        match std::env::var_os("SCHEMAFLOW_DIR") {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Load config from a project directory
    ///
    /// Environment overrides:
    /// 1. `SCHEMAFLOW_DATABASE` replaces `database`
    /// 2. `SCHEMAFLOW_ALLOW_OUT_OF_ORDER` replaces `allowOutOfOrder` in both sections
    pub fn load(project_dir: &Path) -> Result<Self> {
        Self::load_with_env(project_dir, |key| std::env::var(key).ok())
    }

    /// Load config with an explicit environment lookup
    pub fn load_with_env(project_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let settings_path = project_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("{}: {}", settings_path.display(), e))
            })?
        } else {
            SettingsFile::default()
        };

        let out_of_order_override = match env("SCHEMAFLOW_ALLOW_OUT_OF_ORDER") {
            Some(value) => Some(parse_flag("SCHEMAFLOW_ALLOW_OUT_OF_ORDER", &value)?),
            None => None,
        };

        let database = env("SCHEMAFLOW_DATABASE")
            .map(PathBuf::from)
            .or(raw.database)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));

        let resolve = |p: PathBuf| {
            if p.is_absolute() {
                p
            } else {
                project_dir.join(p)
            }
        };

        let section = |raw: NamespaceSection, default_out_of_order: bool| NamespaceConfig {
            allow_out_of_order: out_of_order_override
                .or(raw.allow_out_of_order)
                .unwrap_or(default_out_of_order),
            unit_timeout: raw.unit_timeout_secs.map(Duration::from_secs),
            directory: raw.directory.map(resolve),
        };

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            database: resolve(database),
            lock_file: raw.lock_file.map(resolve),
            // Seeds are independent fixtures; migrations must stay a prefix
            migrations: section(raw.migrations, false),
            seeds: section(raw.seeds, true),
        })
    }

    pub fn namespace(&self, namespace: Namespace) -> &NamespaceConfig {
        match namespace {
            Namespace::Migrations => &self.migrations,
            Namespace::Seeds => &self.seeds,
        }
    }

    /// Runner options for a namespace
    pub fn run_options(&self, namespace: Namespace, stop: StopSignal) -> RunOptions {
        let settings = self.namespace(namespace);
        RunOptions::default()
            .allow_out_of_order(settings.allow_out_of_order)
            .unit_timeout(settings.unit_timeout)
            .lock_path(self.lock_file.clone())
            .stop_signal(stop)
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::Config(format!(
            "{} must be true/false, got '{}'",
            name, value
        ))),
    }
}
