//! Asynchronous dialogue runner for Yarnweave.
//!
//! Drives a [`ContentSource`](yarnweave_abstraction::ContentSource) and fans its
//! lines and option sets out to presentation views:
//!
//! - lines are presented on every line view at once, and the runner waits for
//!   all of them before resuming
//! - option sets race: the first view to choose wins and the others are cancelled
//! - commands are dispatched through a [`CommandRegistry`] and awaited
//!
//! A dialogue runs on a background task started by [`DialogueRunner::start`] and
//! ends when the content completes or [`DialogueRunner::stop`] is called.

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod line;
pub mod options;
pub mod provider;
pub mod registry;
pub mod runner;
pub mod scripted;
pub mod session;

pub use commands::{
    CommandArg, CommandDescriptor, CommandInvocation, CommandRegistry, ParameterKind, split_command_text,
};
pub use config::{MAX_EVENT_CAPACITY, RunnerConfig};
pub use error::{Result, RunnerError};
pub use events::{RunnerEvent, RunnerEvents};
pub use line::LineCoordinator;
pub use options::{OptionCoordinator, PendingSelection};
pub use provider::StringTableLineProvider;
pub use registry::{ViewHandle, ViewMetadata, ViewRegistry};
pub use runner::{DialogueRunner, RunnerControls, UnhandledCommandListener};
pub use scripted::{Node, OptionStep, Program, ScriptedContent, Step};
pub use session::DialogueState;

// Re-export the abstraction crate so callers need a single dependency
pub use yarnweave_abstraction as abstraction;
