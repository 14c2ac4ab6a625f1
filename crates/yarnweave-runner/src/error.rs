// Error types for the dialogue runner

use thiserror::Error;
use yarnweave_abstraction::ContentError;

use crate::session::DialogueState;

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Runner errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RunnerError {
    /// `start` or `load_program` called while a dialogue is active
    #[error("Dialogue is already running (state: {0:?})")]
    AlreadyRunning(DialogueState),

    /// `start` called before a program was loaded
    #[error("No program loaded")]
    NoProgramLoaded,

    /// `start` named a node the program does not contain
    #[error("No node named '{0}' in the loaded program")]
    UnknownNode(String),

    /// Options arrived but no registered view presents options
    #[error("No view is registered to present options")]
    NoOptionViews,

    /// Every option was unavailable and unavailable options are hidden
    #[error("No available options to present")]
    NoAvailableOptions,

    /// All option views finished without a selection while the dialogue was live
    #[error("No view selected an option")]
    NoOptionSelected,

    /// A command matched no handler and no listener consumed it
    #[error("Unhandled command '{0}'")]
    UnhandledCommand(String),

    /// A command was found but could not be dispatched
    #[error("Command '{command}' failed to dispatch: {reason}")]
    CommandDispatch {
        /// Command text
        command: String,
        /// Dispatch failure
        reason: String,
    },

    /// The content source failed
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session task panicked or was aborted
    #[error("Session task failed: {0}")]
    Session(String),
}
