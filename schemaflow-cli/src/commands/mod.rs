//! CLI command implementations

pub mod migrate;
pub mod repair;
pub mod seed;
pub mod status;

use anyhow::{Context, Result};
use dialoguer::Confirm;
use schemaflow_core::config::Config;
use schemaflow_core::SchemaflowContext;

/// Load the project context from `SCHEMAFLOW_DIR` or the current directory
pub fn get_context() -> Result<SchemaflowContext> {
    let project_dir = Config::default_dir().context("Failed to resolve project directory")?;

    SchemaflowContext::new(&project_dir).with_context(|| {
        format!(
            "Failed to initialize schemaflow context in {}",
            project_dir.display()
        )
    })
}

/// Ask before a destructive operation unless `--yes` was given
pub fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}
