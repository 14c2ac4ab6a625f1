//! Dialogue run command.
//!
//! Loads a script, wires the console views into a runner and plays the dialogue
//! until it completes or is interrupted.

use anyhow::Context;
use colored::Colorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use yarnweave_runner::{
    DialogueRunner, RunnerConfig, RunnerEvent, ScriptedContent, StringTableLineProvider,
};

use crate::views::{ConsoleLineView, ConsoleOptionsView, stdin_lines};

/// Options for the run command.
#[derive(Debug)]
pub struct RunOptions {
    pub script: PathBuf,
    pub start: Option<String>,
    pub config: Option<PathBuf>,
    pub strings: Option<PathBuf>,
    pub auto: bool,
    pub choose: Vec<usize>,
}

/// Execute the run command.
pub async fn execute(options: RunOptions) -> anyhow::Result<()> {
    let config = match &options.config {
        Some(path) => RunnerConfig::load_from_toml(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    let program = super::load_program(&options.script)?;
    let start = options.start.clone().unwrap_or_else(|| config.start_node.clone());

    let provider = Arc::new(StringTableLineProvider::new());
    if let Some(path) = &options.strings {
        provider.extend(load_strings(path)?);
    }

    let runner = DialogueRunner::new(ScriptedContent::with_program(program)?, config)?
        .with_line_provider(provider);

    let input = stdin_lines();
    runner
        .add_view(Arc::new(ConsoleLineView::new(options.auto, Arc::clone(&input), runner.controls())))
        .await;
    runner.add_view(Arc::new(ConsoleOptionsView::new(options.choose.clone(), input))).await;

    runner.on_unhandled_command(|command| println!("{}", format!("<<{}>>", command).dimmed()));

    // A halted dialogue never resumes on its own; stop it so the error surfaces.
    let controls = runner.controls();
    let mut events = runner.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RunnerEvent::DialogueHalted { reason }) => {
                    warn!(reason = %reason, "Dialogue halted; stopping");
                    controls.stop();
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let controls = runner.controls();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; stopping dialogue");
            controls.stop();
        }
    });

    debug!(script = %options.script.display(), start = %start, "Starting dialogue");
    runner.start(&start).await?;
    runner.wait().await.context("Dialogue ended with an error")?;
    Ok(())
}

fn load_strings(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read string table {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse string table {}", path.display()))
}
