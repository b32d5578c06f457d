//! Status command - show applied and pending units

use anyhow::Result;
use colored::Colorize;
use schemaflow_core::Namespace;

use super::get_context;
use crate::output;

pub fn run(namespace: Namespace, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let status = ctx.status(namespace)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", format!("Schemaflow {}", namespace).bold());
    println!();

    let mut table = output::create_table();
    table.set_header(vec!["Version", "State", "Applied at", "Note"]);

    for unit in &status.applied {
        let note = if unit.modified { "changed since applied" } else { "" };
        table.add_row(vec![
            unit.version.clone(),
            "applied".to_string(),
            unit.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            note.to_string(),
        ]);
    }
    for unit in &status.pending {
        let note = unit
            .last_error
            .as_ref()
            .map(|e| format!("last {} failed [{}]: {}", e.direction, e.kind, e.message))
            .unwrap_or_default();
        table.add_row(vec![
            unit.version.clone(),
            "pending".to_string(),
            String::new(),
            note,
        ]);
    }

    println!("{}", table);
    println!();
    println!(
        "{} applied, {} pending",
        status.applied.len().to_string().green(),
        status.pending.len().to_string().yellow()
    );

    if !status.orphaned.is_empty() {
        output::warning(&format!(
            "Ledger versions with no known unit: {}",
            status.orphaned.join(", ")
        ));
    }
    if !status.gaps.is_empty() {
        output::warning(&format!(
            "Pending units below the applied head: {}",
            status.gaps.join(", ")
        ));
    }

    Ok(())
}
