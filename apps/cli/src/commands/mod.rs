//! Command implementations for the Yarnweave CLI.

pub mod check;
pub mod run;

use anyhow::Context;
use std::path::Path;
use yarnweave_runner::Program;

/// Reads and validates a script file.
pub fn load_program(path: &Path) -> anyhow::Result<Program> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    let program =
        Program::from_json(&json).with_context(|| format!("Failed to parse script {}", path.display()))?;
    program.validate().with_context(|| format!("Invalid script {}", path.display()))?;
    Ok(program)
}
