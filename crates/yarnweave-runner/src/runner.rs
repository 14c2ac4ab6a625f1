//! Dialogue session controller.
//!
//! [`DialogueRunner`] owns a content source and drives it from a background
//! session task. Lines go through the [`LineCoordinator`], option sets through
//! the [`OptionCoordinator`] and commands through a [`CommandDispatcher`].

use futures::FutureExt;
use futures::future::join_all;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use yarnweave_abstraction::{
    CancellationScope, CommandDispatcher, ContentSource, DialogueEvent, DialogueOption, DispatchResult,
    LineProvider, LineRef, LocalizedLine, OptionId, PresentationView, RawOption,
};

use crate::commands::CommandRegistry;
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::events::{RunnerEvent, RunnerEvents};
use crate::line::LineCoordinator;
use crate::options::OptionCoordinator;
use crate::provider::StringTableLineProvider;
use crate::registry::{ViewHandle, ViewMetadata, ViewRegistry};
use crate::session::{DialogueState, SessionState};

/// Listener for commands no handler accepted.
pub type UnhandledCommandListener = Arc<dyn Fn(&str) + Send + Sync>;

/// State shared between the runner and its session task.
struct RunnerCore {
    config: RunnerConfig,
    views: Arc<ViewRegistry>,
    session: Arc<SessionState>,
    lines: LineCoordinator,
    options: OptionCoordinator,
    events: Arc<RunnerEvents>,
    unhandled: RwLock<Vec<UnhandledCommandListener>>,
}

/// Drives a [`ContentSource`] and delivers its content to presentation views.
pub struct DialogueRunner<C: ContentSource> {
    core: Arc<RunnerCore>,
    /// Content source; taken by the session task while a dialogue runs.
    content: Arc<Mutex<Option<C>>>,
    commands: Arc<CommandRegistry>,
    dispatcher: Arc<dyn CommandDispatcher>,
    line_provider: Arc<dyn LineProvider>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl<C: ContentSource> fmt::Debug for DialogueRunner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogueRunner")
            .field("config", &self.core.config)
            .field("state", &self.core.session.state())
            .finish_non_exhaustive()
    }
}

impl<C: ContentSource> DialogueRunner<C> {
    /// Creates a runner around a content source.
    ///
    /// Commands go to a [`CommandRegistry`] with the built-in commands, and
    /// lines are localised by a [`StringTableLineProvider`] with an empty table.
    ///
    /// # Errors
    /// Returns [`RunnerError::Config`] if the configuration is invalid.
    pub fn new(content: C, config: RunnerConfig) -> Result<Self> {
        config.validate()?;

        let views = Arc::new(ViewRegistry::new());
        let session = Arc::new(SessionState::new());
        let events = Arc::new(RunnerEvents::new(config.event_capacity));
        let lines = LineCoordinator::new(Arc::clone(&views), Arc::clone(&session), Arc::clone(&events));
        let options =
            OptionCoordinator::new(Arc::clone(&views), Arc::clone(&session), Arc::clone(&events), &config);
        let commands = Arc::new(CommandRegistry::with_builtins());

        Ok(Self {
            core: Arc::new(RunnerCore {
                config,
                views,
                session,
                lines,
                options,
                events,
                unhandled: RwLock::new(Vec::new()),
            }),
            content: Arc::new(Mutex::new(Some(content))),
            dispatcher: Arc::clone(&commands) as Arc<dyn CommandDispatcher>,
            commands,
            line_provider: Arc::new(StringTableLineProvider::new()),
            task: Mutex::new(None),
        })
    }

    /// Replaces the line provider.
    #[must_use]
    pub fn with_line_provider(mut self, provider: Arc<dyn LineProvider>) -> Self {
        self.line_provider = provider;
        self
    }

    /// Replaces the command dispatcher. [`Self::commands`] is no longer consulted.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.core.config
    }

    /// Command registry used by the default dispatcher.
    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    /// Loads a program into the content source.
    ///
    /// # Errors
    /// - [`RunnerError::AlreadyRunning`] while a dialogue is active
    /// - [`RunnerError::Content`] if the content source rejects the program
    pub fn load_program(&self, program: C::Program) -> Result<()> {
        let state = self.core.session.state();
        if state.is_active() {
            return Err(RunnerError::AlreadyRunning(state));
        }

        let mut slot = self.content_slot();
        let content = slot.as_mut().ok_or(RunnerError::AlreadyRunning(state))?;
        content.load_program(program)?;
        info!("Program loaded");
        Ok(())
    }

    /// Starts a dialogue at `node` on a background task.
    ///
    /// # Errors
    /// - [`RunnerError::AlreadyRunning`] unless the runner is idle
    /// - [`RunnerError::NoProgramLoaded`] if no program is loaded
    /// - [`RunnerError::UnknownNode`] if the program has no such node
    pub async fn start(&self, node: &str) -> Result<()> {
        let state = self.core.session.state();
        if state.is_active() {
            return Err(RunnerError::AlreadyRunning(state));
        }

        let content = {
            let mut slot = self.content_slot();
            let content = slot.as_mut().ok_or(RunnerError::AlreadyRunning(state))?;
            if !content.has_program() {
                return Err(RunnerError::NoProgramLoaded);
            }
            if !content.node_exists(node) {
                return Err(RunnerError::UnknownNode(node.to_string()));
            }
            content.set_start_node(node)?;
            slot.take().ok_or(RunnerError::AlreadyRunning(state))?
        };

        let dialogue = match self.core.session.begin() {
            Ok(dialogue) => dialogue,
            Err(state) => {
                *self.content_slot() = Some(content);
                return Err(RunnerError::AlreadyRunning(state));
            }
        };

        let task = SessionTask {
            core: Arc::clone(&self.core),
            dispatcher: Arc::clone(&self.dispatcher),
            line_provider: Arc::clone(&self.line_provider),
            dialogue,
            start_node: node.to_string(),
        };
        let slot = Arc::clone(&self.content);
        let handle = tokio::spawn(task.run(content, slot));

        let previous = self.task.lock().unwrap_or_else(PoisonError::into_inner).replace(handle);
        if previous.is_some() {
            debug!("Discarding result of the previous session");
        }
        Ok(())
    }

    /// Requests the running dialogue to stop. A no-op when idle.
    ///
    /// The active delivery and the dialogue scope are cancelled; the session
    /// task then notifies views and returns to idle.
    pub fn stop(&self) {
        if self.core.session.request_stop() {
            info!("Dialogue stop requested");
        }
    }

    /// Waits for the current session task to finish.
    ///
    /// Returns immediately when no session was started since the last wait.
    ///
    /// # Errors
    /// Returns the error that ended or halted the session.
    pub async fn wait(&self) -> Result<()> {
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => handle.await.map_err(|e| RunnerError::Session(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// Handle for views and input code to advance or stop the dialogue.
    #[must_use]
    pub fn controls(&self) -> RunnerControls {
        RunnerControls { session: Arc::clone(&self.core.session) }
    }

    /// Registers a presentation view.
    ///
    /// Returns `false` if this view instance is already registered.
    pub async fn add_view(&self, view: ViewHandle) -> bool {
        self.core.views.register(view).await
    }

    /// Removes every view with the given name.
    pub async fn remove_view(&self, name: &str) -> bool {
        self.core.views.unregister(name).await
    }

    /// Lists registered views.
    pub async fn views(&self) -> Vec<ViewMetadata> {
        self.core.views.list().await
    }

    /// Adds a listener for commands that no handler accepted.
    ///
    /// With at least one listener registered, unknown commands no longer halt
    /// the dialogue.
    pub fn on_unhandled_command<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.core.unhandled.write().unwrap_or_else(PoisonError::into_inner).push(Arc::new(listener));
    }

    /// Subscribes to runner events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.core.events.subscribe()
    }

    /// Current run state.
    pub fn state(&self) -> DialogueState {
        self.core.session.state()
    }

    /// Returns `true` while a dialogue is running or stopping.
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    fn content_slot(&self) -> MutexGuard<'_, Option<C>> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to a runner's session.
#[derive(Clone)]
pub struct RunnerControls {
    session: Arc<SessionState>,
}

impl fmt::Debug for RunnerControls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerControls").field("state", &self.session.state()).finish()
    }
}

impl RunnerControls {
    /// Asks the current line to finish. Returns `false` when no line is being delivered.
    pub fn request_next_line(&self) -> bool {
        self.session.request_next_line()
    }

    /// Asks the current line to speed up. Returns `false` when no line is being delivered.
    pub fn request_hurry_up(&self) -> bool {
        self.session.request_hurry_up()
    }

    /// Stops the running dialogue.
    pub fn stop(&self) {
        self.session.request_stop();
    }

    /// Current run state.
    pub fn state(&self) -> DialogueState {
        self.session.state()
    }
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Started,
    Completed,
}

/// One dialogue run.
struct SessionTask {
    core: Arc<RunnerCore>,
    dispatcher: Arc<dyn CommandDispatcher>,
    line_provider: Arc<dyn LineProvider>,
    dialogue: CancellationScope,
    start_node: String,
}

impl SessionTask {
    async fn run<C: ContentSource>(self, mut content: C, slot: Arc<Mutex<Option<C>>>) -> Result<()> {
        info!(start_node = %self.start_node, "Dialogue started");
        self.notify_views(Lifecycle::Started).await;
        self.core.events.emit(RunnerEvent::DialogueStarted { start_node: self.start_node.clone() });

        let outcome = match AssertUnwindSafe(self.drive(&mut content)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(RunnerError::Session("session loop panicked".to_string())),
        };

        match &outcome {
            Ok(()) => {}
            // Halts were reported when they happened.
            Err(RunnerError::UnhandledCommand(_) | RunnerError::CommandDispatch { .. }) => {}
            Err(e) => {
                error!(error = %e, "Dialogue ended with an error");
                self.core.events.emit_error(e.to_string());
            }
        }

        self.dialogue.cancel();
        content.stop();
        self.notify_views(Lifecycle::Completed).await;

        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(content);
        self.core.session.finish();
        self.core.events.emit(RunnerEvent::DialogueCompleted);
        info!("Dialogue completed");

        outcome
    }

    async fn drive<C: ContentSource>(&self, content: &mut C) -> Result<()> {
        loop {
            // Node events and listener-handled commands never suspend.
            tokio::task::yield_now().await;
            if self.dialogue.is_cancelled() {
                debug!("Dialogue cancelled; leaving session loop");
                return Ok(());
            }

            match content.resume()? {
                DialogueEvent::Line(line) => {
                    let Some(localized) = self.localize(&line).await else {
                        continue;
                    };
                    self.core.lines.deliver_line(&localized).await;
                }
                DialogueEvent::OptionSet(raw) => {
                    let Some(options) = self.localize_options(&raw).await else {
                        continue;
                    };
                    let Some(id) = self.core.options.deliver_options(&options, Some(&self.dialogue)).await?
                    else {
                        continue;
                    };
                    content.select_option(id)?;
                    self.run_selected_option(&options, id).await;
                }
                DialogueEvent::Command(text) => self.run_command(&text).await?,
                DialogueEvent::NodeStart(name) => {
                    debug!(node = %name, "Node started");
                    self.core.events.emit(RunnerEvent::NodeStarted { name });
                }
                DialogueEvent::NodeComplete(name) => {
                    debug!(node = %name, "Node completed");
                    self.core.events.emit(RunnerEvent::NodeCompleted { name });
                }
                DialogueEvent::DialogueComplete => return Ok(()),
            }
        }
    }

    /// Localises a line, presenting the program text if the provider fails.
    ///
    /// Returns `None` if the dialogue is cancelled first.
    async fn localize(&self, line: &LineRef) -> Option<LocalizedLine> {
        tokio::select! {
            biased;
            () = self.dialogue.cancelled() => None,
            result = self.line_provider.localized_line(line, &self.dialogue) => Some(match result {
                Ok(localized) => localized,
                Err(e) => {
                    warn!(line_id = %line.id, error = %e, "Line provider failed; presenting program text");
                    self.core.events.emit_error(format!("Line '{}': {e}", line.id));
                    LocalizedLine::fallback(line)
                }
            }),
        }
    }

    async fn localize_options(&self, raw: &[RawOption]) -> Option<Vec<DialogueOption>> {
        let mut options = Vec::with_capacity(raw.len());
        for option in raw {
            let line = self.localize(&option.line).await?;
            options.push(DialogueOption { id: option.id, line, is_available: option.is_available });
        }
        Some(options)
    }

    async fn run_selected_option(&self, options: &[DialogueOption], id: OptionId) {
        if !self.core.config.run_selected_option_as_line {
            return;
        }
        if let Some(option) = options.iter().find(|option| option.id == id) {
            self.core.lines.deliver_line(&option.line).await;
        }
    }

    async fn run_command(&self, text: &str) -> Result<()> {
        match self.dispatcher.dispatch(text, &self.dialogue) {
            DispatchResult::Succeeded(completion) => {
                self.core.events.emit(RunnerEvent::CommandDispatched { command: text.to_string() });
                tokio::select! {
                    biased;
                    () = self.dialogue.cancelled() => {
                        debug!(command = %text, "Dialogue cancelled while command was running");
                    }
                    result = completion => {
                        if let Err(e) = result {
                            warn!(command = %text, error = %e, "Command failed");
                            self.core.events.emit_error(format!("Command '{text}': {e}"));
                        }
                    }
                }
                Ok(())
            }
            DispatchResult::CommandUnknown { name } => {
                let listeners = self.core.unhandled.read().unwrap_or_else(PoisonError::into_inner).clone();
                if listeners.is_empty() {
                    return self.halt(RunnerError::UnhandledCommand(text.to_string())).await;
                }
                debug!(command = %name, listeners = listeners.len(), "Passing unhandled command to listeners");
                self.core.events.emit(RunnerEvent::UnhandledCommand { command: text.to_string() });
                for listener in &listeners {
                    listener(text);
                }
                Ok(())
            }
            failure => {
                let reason = failure.failure_reason().unwrap_or_default();
                self.halt(RunnerError::CommandDispatch { command: text.to_string(), reason }).await
            }
        }
    }

    /// Reports `err` and holds the dialogue until it is stopped.
    async fn halt(&self, err: RunnerError) -> Result<()> {
        error!(error = %err, "Dialogue halted; waiting for stop");
        self.core.events.emit(RunnerEvent::DialogueHalted { reason: err.to_string() });
        self.dialogue.cancelled().await;
        Err(err)
    }

    async fn notify_views(&self, lifecycle: Lifecycle) {
        let views = self.core.views.all().await;
        join_all(views.iter().map(|view| notify_isolated(view.as_ref(), lifecycle))).await;
    }
}

async fn notify_isolated(view: &dyn PresentationView, lifecycle: Lifecycle) {
    let hook = match lifecycle {
        Lifecycle::Started => view.on_dialogue_started(),
        Lifecycle::Completed => view.on_dialogue_completed(),
    };
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(view = %view.name(), lifecycle = ?lifecycle, error = %e, "View failed lifecycle notification");
        }
        Err(_) => {
            error!(view = %view.name(), lifecycle = ?lifecycle, "View panicked during lifecycle notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{Program, ScriptedContent};
    use yarnweave_abstraction::{LineScopes, ViewError};

    fn program() -> Program {
        Program::from_json(
            r#"{"nodes": [{"name": "Start", "steps": [{"line": {"text": "Hello"}}]}]}"#,
        )
        .unwrap()
    }

    struct InstantView;

    #[async_trait::async_trait]
    impl PresentationView for InstantView {
        fn name(&self) -> &str {
            "instant"
        }

        async fn present_line(&self, _line: &LocalizedLine, _scopes: &LineScopes) -> std::result::Result<(), ViewError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_requires_program() {
        let runner = DialogueRunner::new(ScriptedContent::new(), RunnerConfig::default()).unwrap();
        assert_eq!(runner.start("Start").await, Err(RunnerError::NoProgramLoaded));
        assert_eq!(runner.state(), DialogueState::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_node() {
        let runner = DialogueRunner::new(ScriptedContent::new(), RunnerConfig::default()).unwrap();
        runner.load_program(program()).unwrap();
        assert_eq!(runner.start("Nowhere").await, Err(RunnerError::UnknownNode("Nowhere".to_string())));
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let runner = DialogueRunner::new(ScriptedContent::new(), RunnerConfig::default()).unwrap();
        runner.load_program(program()).unwrap();
        runner.add_view(Arc::new(InstantView)).await;

        runner.start("Start").await.unwrap();
        runner.wait().await.unwrap();

        assert_eq!(runner.state(), DialogueState::Idle);
        // Content is returned, so the runner can start again.
        runner.start("Start").await.unwrap();
        runner.wait().await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RunnerConfig::default().with_start_node("");
        assert!(matches!(DialogueRunner::new(ScriptedContent::new(), config), Err(RunnerError::Config(_))));
    }

    #[tokio::test]
    async fn test_stop_interrupts_endless_jump_loop() {
        let program = Program::from_json(r#"{"nodes": [{"name": "A", "steps": [{"jump": "A"}]}]}"#).unwrap();
        let runner = DialogueRunner::new(ScriptedContent::new(), RunnerConfig::default()).unwrap();
        runner.load_program(program).unwrap();

        runner.start("A").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        runner.stop();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), runner.wait()).await;
        assert_eq!(result.expect("session did not stop"), Ok(()));
        assert_eq!(runner.state(), DialogueState::Idle);
    }

    #[tokio::test]
    async fn test_controls_without_line() {
        let runner = DialogueRunner::new(ScriptedContent::new(), RunnerConfig::default()).unwrap();
        let controls = runner.controls();
        assert!(!controls.request_next_line());
        assert!(!controls.request_hurry_up());
        controls.stop();
        assert_eq!(controls.state(), DialogueState::Idle);
    }
}
