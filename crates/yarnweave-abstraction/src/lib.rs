//! Dialogue abstraction layer for Yarnweave.
//!
//! This module defines the dialogue data model, the cancellation scopes shared
//! between the runner and its views, and the traits for the collaborators the
//! runner drives: the content source, the line provider, presentation views and
//! the command dispatcher.

pub mod scope;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

pub use scope::{CancellationScope, LineScopes};

/// Identifier of a line in the string table (e.g. `line:intro-1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub String);

impl LineId {
    /// Creates a line id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LineId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of an option within the option set it was offered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionId(pub usize);

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unlocalised line as emitted by the content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRef {
    /// String table id of the line.
    pub id: LineId,
    /// Text carried by the program itself, used when no localisation exists.
    pub raw_text: String,
    /// Values for the `{0}`, `{1}`, ... placeholders in the text.
    #[serde(default)]
    pub substitutions: Vec<String>,
}

impl LineRef {
    /// Creates a line reference without substitutions.
    pub fn new(id: impl Into<LineId>, raw_text: impl Into<String>) -> Self {
        Self { id: id.into(), raw_text: raw_text.into(), substitutions: Vec::new() }
    }

    /// Sets the substitution values.
    #[must_use]
    pub fn with_substitutions(mut self, substitutions: Vec<String>) -> Self {
        self.substitutions = substitutions;
        self
    }
}

impl From<String> for LineId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An option as emitted by the content source, before localisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOption {
    /// Id to pass back to [`ContentSource::select_option`].
    pub id: OptionId,
    /// The option's text.
    pub line: LineRef,
    /// Whether the option's condition passed.
    pub is_available: bool,
}

/// A line ready for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedLine {
    /// String table id of the line.
    pub text_id: LineId,
    /// Fully substituted text, including any character name prefix.
    pub display_text: String,
    /// Speaker, when the line carries a `Name: text` prefix.
    pub character_name: Option<String>,
    /// Hashtag metadata attached to the line.
    pub metadata: BTreeSet<String>,
}

impl LocalizedLine {
    /// Creates a line with no character name and no metadata.
    pub fn new(text_id: impl Into<LineId>, display_text: impl Into<String>) -> Self {
        Self {
            text_id: text_id.into(),
            display_text: display_text.into(),
            character_name: None,
            metadata: BTreeSet::new(),
        }
    }

    /// Builds the line presented after the line provider failed.
    ///
    /// Uses the raw program text; placeholders without a value are left as-is.
    #[must_use]
    pub fn fallback(line: &LineRef) -> Self {
        Self::new(line.id.clone(), expand_available_substitutions(&line.raw_text, &line.substitutions))
    }

    /// Returns the text with the `Name: ` prefix removed.
    #[must_use]
    pub fn text_without_character_name(&self) -> &str {
        let Some(name) = &self.character_name else {
            return &self.display_text;
        };
        self.display_text
            .strip_prefix(name.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .map_or(self.display_text.as_str(), str::trim_start)
    }
}

/// An option ready for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueOption {
    /// Id to report back when the option is chosen.
    pub id: OptionId,
    /// The localised option text.
    pub line: LocalizedLine,
    /// Whether the option may be chosen.
    pub is_available: bool,
}

/// Content produced by the content source, one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueEvent {
    /// A line to present.
    Line(LineRef),
    /// A set of options, one of which must be selected before resuming.
    OptionSet(Vec<RawOption>),
    /// A `<<command>>` for game code.
    Command(String),
    /// Execution entered a node.
    NodeStart(String),
    /// Execution left a node.
    NodeComplete(String),
    /// The dialogue has ended.
    DialogueComplete,
}

/// Replaces `{N}` placeholders with the matching substitution.
///
/// # Errors
/// Returns [`LineError::MissingSubstitution`] when a placeholder has no value.
pub fn expand_substitutions(text: &str, substitutions: &[String]) -> Result<String, LineError> {
    expand(text, substitutions, false)
}

/// Replaces the `{N}` placeholders that have a value and keeps the rest verbatim.
#[must_use]
pub fn expand_available_substitutions(text: &str, substitutions: &[String]) -> String {
    expand(text, substitutions, true).unwrap_or_else(|_| text.to_string())
}

fn expand(text: &str, substitutions: &[String], lenient: bool) -> Result<String, LineError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if close > 0 && after[..close].bytes().all(|b| b.is_ascii_digit()) => {
                let index = after[..close].parse::<usize>().unwrap_or(usize::MAX);
                match substitutions.get(index) {
                    Some(value) => out.push_str(value),
                    None if lenient => out.push_str(&rest[open..=open + close + 1]),
                    None => return Err(LineError::MissingSubstitution { index }),
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Errors raised by a content source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// No program has been loaded.
    #[error("No program loaded")]
    NoProgram,

    /// The requested node does not exist in the program.
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// `resume` was called without a current node.
    #[error("Content source is not running")]
    NotRunning,

    /// `resume` was called while an option selection is outstanding.
    #[error("An option must be selected before resuming")]
    SelectionRequired,

    /// `select_option` named an option that was not offered.
    #[error("Option {0} was not offered")]
    InvalidOption(OptionId),

    /// `select_option` was called with no option set pending.
    #[error("No option selection is pending")]
    NoSelectionPending,

    /// Invalid program data.
    #[error("Invalid program: {0}")]
    InvalidProgram(String),
}

/// Errors raised by a line provider. A failed lookup is never valid content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// The line id has no text.
    #[error("No text found for line '{0}'")]
    NotFound(LineId),

    /// A placeholder refers to a missing substitution.
    #[error("Missing substitution for placeholder {{{index}}}")]
    MissingSubstitution {
        /// Index of the placeholder.
        index: usize,
    },

    /// The lookup was abandoned because the dialogue was cancelled.
    #[error("Line lookup cancelled")]
    Cancelled,

    /// Other provider errors.
    #[error("Line provider error: {0}")]
    Other(String),
}

/// Errors raised inside a single presentation view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    /// The view failed to present content.
    #[error("Presentation failed: {0}")]
    Presentation(String),

    /// Input for the view could not be read.
    #[error("Input error: {0}")]
    Input(String),
}

/// Errors raised by a command handler while it runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// An argument was well-formed but not acceptable to the handler.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The handler failed.
    #[error("Command failed: {0}")]
    Failed(String),
}

/// Completion of a dispatched command. The runner awaits it before resuming.
pub type CommandCompletion = BoxFuture<'static, Result<(), CommandError>>;

/// Outcome of dispatching a command.
pub enum DispatchResult {
    /// A handler accepted the command; await the completion before resuming.
    Succeeded(CommandCompletion),
    /// The command names a target that does not exist.
    NoTargetFound {
        /// Target name from the command text.
        target: String,
    },
    /// The target exists but lacks the component the command runs on.
    TargetMissingComponent {
        /// Target name from the command text.
        target: String,
        /// Component the command requires.
        component: String,
    },
    /// Wrong number of arguments.
    InvalidParameterCount {
        /// Number of arguments the handler takes.
        expected: usize,
        /// Number of arguments supplied.
        found: usize,
    },
    /// An argument could not be parsed.
    InvalidParameter {
        /// Zero-based argument position.
        position: usize,
        /// Why parsing failed.
        reason: String,
    },
    /// No handler is registered under the command name.
    CommandUnknown {
        /// Command name from the command text.
        name: String,
    },
}

impl DispatchResult {
    /// Describes a failed dispatch; `None` for `Succeeded`.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Succeeded(_) => None,
            Self::NoTargetFound { target } => Some(format!("no target named '{}'", target)),
            Self::TargetMissingComponent { target, component } => {
                Some(format!("target '{}' has no '{}' component", target, component))
            }
            Self::InvalidParameterCount { expected, found } => {
                Some(format!("expected {} parameters, found {}", expected, found))
            }
            Self::InvalidParameter { position, reason } => {
                Some(format!("parameter {}: {}", position, reason))
            }
            Self::CommandUnknown { name } => Some(format!("unknown command '{}'", name)),
        }
    }
}

impl fmt::Debug for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(_) => f.write_str("Succeeded(..)"),
            other => write!(f, "Failed({})", other.failure_reason().unwrap_or_default()),
        }
    }
}

/// Which kinds of content a view presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCapabilities {
    /// The view presents lines.
    pub lines: bool,
    /// The view presents options.
    pub options: bool,
}

impl ViewCapabilities {
    /// Lines only.
    pub const LINES: Self = Self { lines: true, options: false };
    /// Options only.
    pub const OPTIONS: Self = Self { lines: false, options: true };
    /// Lines and options.
    pub const ALL: Self = Self { lines: true, options: true };
}

/// The dialogue state machine producing content.
///
/// The runner owns the source while a dialogue runs and pulls one event at a
/// time; the source must not produce the next event until `resume` is called.
pub trait ContentSource: Send + 'static {
    /// Compiled program data accepted by `load_program`.
    type Program: Send;

    /// Replaces the loaded program.
    ///
    /// # Errors
    /// Returns an error if the program is malformed.
    fn load_program(&mut self, program: Self::Program) -> Result<(), ContentError>;

    /// Returns `true` when a program is loaded.
    fn has_program(&self) -> bool;

    /// Returns `true` when the loaded program has a node with this name.
    fn node_exists(&self, name: &str) -> bool;

    /// Positions execution at the start of a node.
    ///
    /// # Errors
    /// Returns an error if there is no program or no such node.
    fn set_start_node(&mut self, name: &str) -> Result<(), ContentError>;

    /// Runs until the next event and returns it.
    ///
    /// # Errors
    /// Returns an error if the source is not running or a selection is pending.
    fn resume(&mut self) -> Result<DialogueEvent, ContentError>;

    /// Answers the most recent option set.
    ///
    /// # Errors
    /// Returns an error if no option set is pending or the id was not offered.
    fn select_option(&mut self, id: OptionId) -> Result<(), ContentError>;

    /// Halts execution. The next `resume` fails until a start node is set.
    fn stop(&mut self);
}

/// Turns line references into presentable lines.
#[async_trait]
pub trait LineProvider: Send + Sync {
    /// Localises a line.
    ///
    /// # Errors
    /// Returns a [`LineError`] when the line cannot be produced.
    async fn localized_line(
        &self,
        line: &LineRef,
        scope: &CancellationScope,
    ) -> Result<LocalizedLine, LineError>;
}

/// A presentation surface for lines and/or options.
///
/// Every method may suspend. Views are expected to watch the scopes they are
/// given and return promptly once cancelled.
#[async_trait]
pub trait PresentationView: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Which requests this view handles.
    fn capabilities(&self) -> ViewCapabilities {
        ViewCapabilities::ALL
    }

    /// Called once when a dialogue starts.
    async fn on_dialogue_started(&self) -> Result<(), ViewError> {
        Ok(())
    }

    /// Called once when a dialogue ends, however it ended.
    async fn on_dialogue_completed(&self) -> Result<(), ViewError> {
        Ok(())
    }

    /// Presents a line until it is done or `scopes.next_line()` is cancelled.
    async fn present_line(&self, _line: &LocalizedLine, _scopes: &LineScopes) -> Result<(), ViewError> {
        Ok(())
    }

    /// Presents options. Returns the chosen id, or `None` when cancelled or
    /// when this view does not choose.
    async fn present_options(
        &self,
        _options: &[DialogueOption],
        _scope: &CancellationScope,
    ) -> Result<Option<OptionId>, ViewError> {
        Ok(None)
    }
}

/// Routes command text to game code.
pub trait CommandDispatcher: Send + Sync {
    /// Dispatches a command. `scope` is cancelled when the dialogue stops.
    fn dispatch(&self, text: &str, scope: &CancellationScope) -> DispatchResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_substitutions() {
        let subs = vec!["Alice".to_string(), "3".to_string()];
        let text = expand_substitutions("{0} has {1} apples, {0}!", &subs).unwrap();
        assert_eq!(text, "Alice has 3 apples, Alice!");
    }

    #[test]
    fn test_expand_substitutions_leaves_non_placeholders() {
        let text = expand_substitutions("a {b} {} {", &[]).unwrap();
        assert_eq!(text, "a {b} {} {");
    }

    #[test]
    fn test_expand_available_substitutions_keeps_missing() {
        let subs = vec!["x".to_string()];
        assert_eq!(expand_available_substitutions("{0}, {2} and {1}{", &subs), "x, {2} and {1}{");
        assert_eq!(expand_available_substitutions("none {0}", &[]), "none {0}");
    }

    #[test]
    fn test_expand_substitutions_missing_value() {
        let err = expand_substitutions("{0} and {1}", &["x".to_string()]).unwrap_err();
        assert_eq!(err, LineError::MissingSubstitution { index: 1 });
    }

    #[test]
    fn test_fallback_line_keeps_placeholders_on_error() {
        let line = LineRef::new("line:1", "Hi {0}, you owe {1}").with_substitutions(vec!["Bob".to_string()]);
        let fallback = LocalizedLine::fallback(&line);
        assert_eq!(fallback.display_text, "Hi Bob, you owe {1}");
        assert_eq!(fallback.text_id, LineId::new("line:1"));
        assert!(fallback.metadata.is_empty());
    }

    #[test]
    fn test_text_without_character_name() {
        let mut line = LocalizedLine::new("line:1", "Sally: Hi there");
        line.character_name = Some("Sally".to_string());
        assert_eq!(line.text_without_character_name(), "Hi there");

        let plain = LocalizedLine::new("line:2", "Narration: continues");
        assert_eq!(plain.text_without_character_name(), "Narration: continues");
    }

    #[test]
    fn test_dispatch_failure_reason() {
        let result = DispatchResult::InvalidParameterCount { expected: 2, found: 1 };
        assert_eq!(result.failure_reason().unwrap(), "expected 2 parameters, found 1");

        let ok = DispatchResult::Succeeded(Box::pin(async { Ok(()) }));
        assert!(ok.failure_reason().is_none());
        assert_eq!(format!("{:?}", ok), "Succeeded(..)");
    }
}
