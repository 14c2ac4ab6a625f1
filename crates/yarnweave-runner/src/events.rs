//! Runner event broadcasting.
//!
//! Observers subscribe to a broadcast channel of [`RunnerEvent`]s instead of
//! wiring engine signals.

use tokio::sync::broadcast;
use tracing::debug;
use yarnweave_abstraction::{LineId, OptionId};

/// Notifications emitted while a dialogue runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    /// A dialogue started.
    DialogueStarted {
        /// Node the dialogue started from.
        start_node: String,
    },
    /// Execution entered a node.
    NodeStarted {
        /// Node name.
        name: String,
    },
    /// Execution left a node.
    NodeCompleted {
        /// Node name.
        name: String,
    },
    /// All views finished presenting a line.
    LinePresented {
        /// Line id.
        line_id: LineId,
    },
    /// An option set is being presented.
    OptionsPresented {
        /// Ids of the options shown to views.
        option_ids: Vec<OptionId>,
    },
    /// A view chose an option.
    OptionSelected {
        /// Chosen option.
        option_id: OptionId,
    },
    /// A command was dispatched to a handler.
    CommandDispatched {
        /// Command text.
        command: String,
    },
    /// A command had no handler and was passed to the unhandled-command listeners.
    UnhandledCommand {
        /// Command text.
        command: String,
    },
    /// The dialogue stopped advancing because of a command it cannot run.
    ///
    /// It stays halted until stopped.
    DialogueHalted {
        /// Why the dialogue halted.
        reason: String,
    },
    /// An error was reported.
    Error {
        /// Error message.
        message: String,
    },
    /// The dialogue ended.
    DialogueCompleted,
}

/// Broadcaster for runner events.
#[derive(Debug)]
pub struct RunnerEvents {
    /// Broadcast sender for runner events.
    broadcast_tx: broadcast::Sender<RunnerEvent>,
}

impl RunnerEvents {
    /// Creates a broadcaster holding up to `capacity` unread events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self { broadcast_tx }
    }

    /// Subscribes to runner events.
    ///
    /// Only events emitted after subscribing are received.
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Emits an event. Having no subscribers is not an error.
    pub fn emit(&self, event: RunnerEvent) {
        debug!("Runner event: {:?}", event);
        let _ = self.broadcast_tx.send(event);
    }

    /// Emits an error event.
    pub fn emit_error(&self, message: impl Into<String>) {
        self.emit(RunnerEvent::Error { message: message.into() });
    }
}

impl Default for RunnerEvents {
    fn default() -> Self {
        Self::new(100)
    }
}
