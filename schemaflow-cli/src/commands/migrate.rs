//! Up and down commands - run a namespace forward or backward

use anyhow::{bail, Result};
use colored::Colorize;
use schemaflow_core::{BatchReport, Namespace};

use super::{confirm, get_context};
use crate::output;

fn print(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        output::batch(report);
    }
    Ok(())
}

pub fn up(namespace: Namespace, target: Option<&str>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let report = ctx.runner(namespace).up(target)?;
    print(&report, json)
}

pub fn down(namespace: Namespace, target: Option<&str>, all: bool, yes: bool, json: bool) -> Result<()> {
    if target.is_none() && !all {
        bail!("Pass --target <version> or --all to choose what to roll back");
    }

    let ctx = get_context()?;
    let scope = match target {
        Some(version) => format!("every {} unit above {}", namespace, version),
        None => format!("every applied {} unit", namespace),
    };

    if !yes {
        println!("\n{}", format!("This will roll back {}.", scope).yellow());
    }
    if !confirm("Are you sure?", yes)? {
        println!("{}\n", "Cancelled".dimmed());
        return Ok(());
    }

    let report = ctx.runner(namespace).down(target)?;
    print(&report, json)
}
