//! Schemaflow CLI - schema migrations and seeds for DuckDB

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{migrate, repair, seed, status};
use schemaflow_core::Namespace;

/// Schemaflow - versioned schema migrations and data seeds
#[derive(Parser)]
#[command(name = "schemaflow", version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Up {
        /// Stop after this version (default: latest)
        #[arg(long)]
        target: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll back applied migrations
    Down {
        /// Roll back every migration above this version
        #[arg(long, conflicts_with = "all")]
        target: Option<String>,
        /// Roll back every applied migration
        #[arg(long)]
        all: bool,
        /// Skip confirmation prompt
        #[arg(long, short)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply or roll back seeds
    Seed {
        #[command(subcommand)]
        command: seed::SeedCommands,
    },

    /// Show applied and pending units
    Status {
        /// Show seeds instead of migrations
        #[arg(long)]
        seeds: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a one-off filtered DELETE or UPDATE
    Repair {
        /// Name recorded in the run log
        #[arg(long)]
        name: String,
        /// Table to repair
        #[arg(long, required_unless_present = "sql")]
        table: Option<String>,
        /// Delete matching rows
        #[arg(long, conflicts_with = "set")]
        delete: bool,
        /// Column assignments (column=value), repeatable
        #[arg(long)]
        set: Vec<String>,
        /// Row filter (column=value, use `null` for IS NULL), repeatable
        #[arg(long = "where", required_unless_present = "sql")]
        filter: Vec<String>,
        /// One DELETE or UPDATE with its own WHERE clause, instead of the flags above
        #[arg(long, conflicts_with_all = ["table", "delete", "set", "filter"])]
        sql: Option<String>,
        /// Positional parameter for --sql, repeatable (`null` for SQL NULL)
        #[arg(long = "param", requires = "sql")]
        params: Vec<String>,
        /// Skip confirmation prompt
        #[arg(long, short)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Up { target, json } => migrate::up(Namespace::Migrations, target.as_deref(), json),
        Commands::Down { target, all, yes, json } => {
            migrate::down(Namespace::Migrations, target.as_deref(), all, yes, json)
        }
        Commands::Seed { command } => seed::run(command),
        Commands::Status { seeds, json } => {
            let namespace = if seeds { Namespace::Seeds } else { Namespace::Migrations };
            status::run(namespace, json)
        }
        Commands::Repair {
            name,
            table,
            delete,
            set,
            filter,
            sql,
            params,
            yes,
            json,
        } => repair::run(
            &name,
            table.as_deref(),
            delete,
            &set,
            &filter,
            sql.as_deref(),
            &params,
            yes,
            json,
        ),
    }
}
