//! Repair command - one-off filtered data fix, built from flags or given as SQL

use anyhow::{bail, Result};
use colored::Colorize;
use schemaflow_core::domain::Predicate;
use schemaflow_core::services::RepairScript;
use serde_json::Value;

use super::{confirm, get_context};
use crate::output;

/// Parse `column=value`; the bare word `null` is SQL NULL, anything else a string
fn parse_assignment(arg: &str) -> Result<(String, Value)> {
    let Some((column, value)) = arg.split_once('=') else {
        bail!("Expected column=value, got '{}'", arg);
    };
    let column = column.trim();
    if column.is_empty() {
        bail!("Missing column name in '{}'", arg);
    }
    let value = match value {
        "null" => Value::Null,
        other => Value::String(other.to_string()),
    };
    Ok((column.to_string(), value))
}

/// Parse a `--param` value; the bare word `null` is SQL NULL
fn parse_param(arg: &str) -> Value {
    match arg {
        "null" => Value::Null,
        other => Value::String(other.to_string()),
    }
}

fn build_script(
    name: &str,
    table: Option<&str>,
    delete: bool,
    set: &[String],
    filter: &[String],
    sql: Option<&str>,
    params: &[String],
) -> Result<RepairScript> {
    if let Some(sql) = sql {
        let params = params.iter().map(|p| parse_param(p)).collect();
        return Ok(RepairScript::sql(name, sql, params));
    }
    let Some(table) = table else {
        bail!("Pass --table with --where, or a raw statement with --sql");
    };
    if filter.is_empty() {
        bail!("Pass at least one --where column=value");
    }

    let mut conditions = filter
        .iter()
        .map(|f| parse_assignment(f).map(|(column, value)| Predicate::eq(column, value)))
        .collect::<Result<Vec<_>>>()?;
    let predicate = if conditions.len() == 1 {
        conditions.remove(0)
    } else {
        Predicate::and(conditions)
    };

    if delete {
        return Ok(RepairScript::delete(name, table, predicate));
    }
    if set.is_empty() {
        bail!("Pass --delete or at least one --set column=value");
    }
    let assignments = set
        .iter()
        .map(|s| parse_assignment(s))
        .collect::<Result<Vec<_>>>()?;
    Ok(RepairScript::update(name, table, assignments, predicate))
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    name: &str,
    table: Option<&str>,
    delete: bool,
    set: &[String],
    filter: &[String],
    sql: Option<&str>,
    params: &[String],
    yes: bool,
    json: bool,
) -> Result<()> {
    let script = build_script(name, table, delete, set, filter, sql, params)?;
    script.validate()?;

    let ctx = get_context()?;

    if !yes {
        let statement = script.statement();
        println!("\n{}", "This will run:".yellow());
        println!("  {}", statement.sql);
        if !statement.params.is_empty() {
            println!("  {}", format!("with {:?}", statement.params).dimmed());
        }
    }
    if !confirm("Run this repair?", yes)? {
        println!("{}\n", "Cancelled".dimmed());
        return Ok(());
    }

    let outcome = ctx.repair(&script)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        output::success(&format!(
            "Repair '{}' affected {} row(s)",
            outcome.name, outcome.affected_rows
        ));
    }
    Ok(())
}
