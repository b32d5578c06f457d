//! Seed command - apply or roll back reference data

use anyhow::Result;
use clap::Subcommand;
use schemaflow_core::Namespace;

use super::migrate;

#[derive(Subcommand)]
pub enum SeedCommands {
    /// Apply pending seeds
    Up {
        /// Stop after this version (default: latest)
        #[arg(long)]
        target: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Roll back applied seeds
    Down {
        /// Roll back every seed above this version
        #[arg(long, conflicts_with = "all")]
        target: Option<String>,
        /// Roll back every applied seed
        #[arg(long)]
        all: bool,
        /// Skip confirmation prompt
        #[arg(long, short)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: SeedCommands) -> Result<()> {
    match command {
        SeedCommands::Up { target, json } => migrate::up(Namespace::Seeds, target.as_deref(), json),
        SeedCommands::Down { target, all, yes, json } => {
            migrate::down(Namespace::Seeds, target.as_deref(), all, yes, json)
        }
    }
}
