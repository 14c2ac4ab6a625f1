//! Console presentation views.

use async_trait::async_trait;
use colored::Colorize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::debug;
use yarnweave_abstraction::{
    CancellationScope, DialogueOption, LineScopes, LocalizedLine, OptionId, PresentationView,
    ViewCapabilities, ViewError,
};
use yarnweave_runner::RunnerControls;

/// Stdin lines shared by the console views.
pub type InputLines = Arc<tokio::sync::Mutex<Lines<BufReader<Stdin>>>>;

/// Wraps stdin for the console views.
pub fn stdin_lines() -> InputLines {
    Arc::new(tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

/// Reads one line; `None` at end of input.
async fn read_input(input: &InputLines) -> Result<Option<String>, ViewError> {
    input.lock().await.next_line().await.map_err(|e| ViewError::Input(e.to_string()))
}

/// Prints lines to stdout.
pub struct ConsoleLineView {
    auto: bool,
    input: InputLines,
    controls: RunnerControls,
}

impl ConsoleLineView {
    pub fn new(auto: bool, input: InputLines, controls: RunnerControls) -> Self {
        Self { auto, input, controls }
    }
}

#[async_trait]
impl PresentationView for ConsoleLineView {
    fn name(&self) -> &str {
        "console-lines"
    }

    fn capabilities(&self) -> ViewCapabilities {
        ViewCapabilities::LINES
    }

    async fn present_line(&self, line: &LocalizedLine, scopes: &LineScopes) -> Result<(), ViewError> {
        match &line.character_name {
            Some(name) => println!("{}: {}", name.bold().cyan(), line.text_without_character_name()),
            None => println!("{}", line.display_text),
        }

        if self.auto {
            return Ok(());
        }

        tokio::select! {
            biased;
            () = scopes.next_line().cancelled() => {}
            input = read_input(&self.input) => {
                if input?.is_none() {
                    debug!("Input closed; advancing");
                }
                self.controls.request_next_line();
                scopes.next_line().cancelled().await;
            }
        }
        Ok(())
    }
}

/// Prints numbered options and reads the choice.
///
/// Scripted choices are used first, then stdin.
pub struct ConsoleOptionsView {
    choices: Mutex<VecDeque<usize>>,
    input: InputLines,
}

impl ConsoleOptionsView {
    pub fn new(choices: Vec<usize>, input: InputLines) -> Self {
        Self { choices: Mutex::new(choices.into()), input }
    }

    fn next_scripted(&self) -> Option<usize> {
        self.choices.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    async fn read_choice(&self, options: &[DialogueOption]) -> Result<OptionId, ViewError> {
        loop {
            let Some(input) = read_input(&self.input).await? else {
                return Err(ViewError::Input("input closed before an option was chosen".to_string()));
            };
            match pick(options, input.trim().parse().ok()) {
                Ok(id) => return Ok(id),
                Err(message) => println!("{}", message.yellow()),
            }
        }
    }
}

/// Maps a 1-based choice onto an available option.
fn pick(options: &[DialogueOption], choice: Option<usize>) -> Result<OptionId, String> {
    let option = choice
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| options.get(index))
        .ok_or_else(|| format!("Choose a number from 1 to {}", options.len()))?;
    if !option.is_available {
        return Err(format!("'{}' is not available", option.line.display_text));
    }
    Ok(option.id)
}

#[async_trait]
impl PresentationView for ConsoleOptionsView {
    fn name(&self) -> &str {
        "console-options"
    }

    fn capabilities(&self) -> ViewCapabilities {
        ViewCapabilities::OPTIONS
    }

    async fn present_options(
        &self,
        options: &[DialogueOption],
        scope: &CancellationScope,
    ) -> Result<Option<OptionId>, ViewError> {
        for (i, option) in options.iter().enumerate() {
            if option.is_available {
                println!("  {}) {}", i + 1, option.line.display_text);
            } else {
                println!("  {}) {} {}", i + 1, option.line.display_text, "(unavailable)".dimmed());
            }
        }

        if let Some(choice) = self.next_scripted() {
            debug!(choice, "Using scripted choice");
            return pick(options, Some(choice)).map(Some).map_err(ViewError::Input);
        }

        tokio::select! {
            biased;
            () = scope.cancelled() => Ok(None),
            choice = self.read_choice(options) => choice.map(Some),
        }
    }
}
