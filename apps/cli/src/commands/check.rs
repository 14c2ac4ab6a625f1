//! Script validation command.

use colored::Colorize;
use std::path::Path;
use yarnweave_runner::Step;

/// Execute the check command.
///
/// Parses and validates a script and prints a summary of its nodes.
pub fn execute(script: &Path) -> anyhow::Result<()> {
    let program = super::load_program(script)?;

    println!("{} {}", "✓".green(), script.display());
    for node in &program.nodes {
        let lines = node.steps.iter().filter(|step| matches!(step, Step::Line { .. })).count();
        let options = node.steps.iter().filter(|step| matches!(step, Step::Options(_))).count();
        println!("  {} ({} lines, {} option sets)", node.name, lines, options);
    }
    println!("{} nodes", program.nodes.len());
    Ok(())
}
