//! Output formatting utilities

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use schemaflow_core::{BatchReport, Direction};

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print the outcome of a batch
pub fn batch(report: &BatchReport) {
    let verb = match report.direction {
        Direction::Forward => "Applied",
        Direction::Backward => "Rolled back",
    };

    if report.is_noop() && !report.stopped {
        info(&format!("Nothing to do: {} are up to date", report.namespace));
        return;
    }

    for version in &report.units {
        println!("  {} {}", "✓".green(), version);
    }
    success(&format!(
        "{} {} {} unit(s)",
        verb,
        report.units.len(),
        report.namespace
    ));

    if report.stopped {
        warning("Stopped before the remaining units");
    }
}
