//! Command registration and dispatch.
//!
//! Commands are registered explicitly in a table keyed by name. A descriptor
//! records the parameter kinds, the component the command runs on (for target
//! commands) and the handler closure.

use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};
use yarnweave_abstraction::{
    CancellationScope, CommandCompletion, CommandDispatcher, CommandError, DispatchResult,
};

/// Kind of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// Any text.
    String,
    /// A floating-point number.
    Number,
    /// `true` or `false`.
    Bool,
}

/// A parsed command argument.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArg {
    /// Text argument.
    String(String),
    /// Numeric argument.
    Number(f64),
    /// Boolean argument.
    Bool(bool),
}

impl CommandArg {
    /// Returns the text, if this is a string argument.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number, if this is a numeric argument.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the flag, if this is a boolean argument.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Everything a handler receives for one command.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    /// Command name.
    pub name: String,
    /// Target name, for target commands.
    pub target: Option<String>,
    /// Parsed arguments (excluding the target).
    pub args: Vec<CommandArg>,
    /// Cancelled when the dialogue stops.
    pub scope: CancellationScope,
}

type HandlerFn = Arc<dyn Fn(CommandInvocation) -> CommandCompletion + Send + Sync>;

/// A registered command.
#[derive(Clone)]
pub struct CommandDescriptor {
    /// Command name.
    pub name: String,
    /// Parameter kinds, in order.
    pub parameters: Vec<ParameterKind>,
    /// Component a target must have, for target commands.
    pub component: Option<String>,
    handler: HandlerFn,
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

/// Table of commands and named targets.
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, CommandDescriptor>>,
    /// Target name -> components it carries.
    targets: RwLock<HashMap<String, HashSet<String>>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry").field("commands", &self.names()).finish_non_exhaustive()
    }
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { commands: RwLock::new(HashMap::new()), targets: RwLock::new(HashMap::new()) }
    }

    /// Creates a registry with the built-in `wait <seconds>` command.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.add_command("wait", vec![ParameterKind::Number], |invocation| wait(invocation).boxed());
        registry
    }

    /// Registers an async command. Replaces any command with the same name.
    pub fn add_command<F>(&self, name: impl Into<String>, parameters: Vec<ParameterKind>, handler: F)
    where
        F: Fn(CommandInvocation) -> CommandCompletion + Send + Sync + 'static,
    {
        self.insert(CommandDescriptor {
            name: name.into(),
            parameters,
            component: None,
            handler: Arc::new(handler),
        });
    }

    /// Registers a command that completes as soon as the closure returns.
    pub fn add_sync_command<F>(&self, name: impl Into<String>, parameters: Vec<ParameterKind>, handler: F)
    where
        F: Fn(&CommandInvocation) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        self.add_command(name, parameters, move |invocation| {
            let result = handler(&invocation);
            futures::future::ready(result).boxed()
        });
    }

    /// Registers a command whose first argument names a target carrying `component`.
    pub fn add_target_command<F>(
        &self,
        name: impl Into<String>,
        component: impl Into<String>,
        parameters: Vec<ParameterKind>,
        handler: F,
    ) where
        F: Fn(CommandInvocation) -> CommandCompletion + Send + Sync + 'static,
    {
        self.insert(CommandDescriptor {
            name: name.into(),
            parameters,
            component: Some(component.into()),
            handler: Arc::new(handler),
        });
    }

    /// Registers (or replaces) a named target and the components it carries.
    pub fn register_target<I, S>(&self, name: impl Into<String>, components: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let components: HashSet<String> = components.into_iter().map(Into::into).collect();
        debug!(target_name = %name, components = components.len(), "Registering command target");
        self.targets.write().unwrap_or_else(PoisonError::into_inner).insert(name, components);
    }

    /// Removes a target. Returns `true` if it existed.
    pub fn remove_target(&self, name: &str) -> bool {
        self.targets.write().unwrap_or_else(PoisonError::into_inner).remove(name).is_some()
    }

    /// Removes a command. Returns `true` if it existed.
    pub fn remove_command(&self, name: &str) -> bool {
        let removed =
            self.commands.write().unwrap_or_else(PoisonError::into_inner).remove(name).is_some();
        if !removed {
            warn!(command = %name, "Attempted to remove non-existent command");
        }
        removed
    }

    /// Returns `true` if a command with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.commands.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.commands.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        names.sort();
        names
    }

    fn insert(&self, descriptor: CommandDescriptor) {
        let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
        debug!(command = %descriptor.name, parameters = descriptor.parameters.len(), "Registering command");
        if commands.insert(descriptor.name.clone(), descriptor).is_some() {
            warn!("Command replaced in registry");
        }
    }

    fn resolve_target(&self, target: &str, component: &str) -> Option<DispatchResult> {
        let targets = self.targets.read().unwrap_or_else(PoisonError::into_inner);
        match targets.get(target) {
            None => Some(DispatchResult::NoTargetFound { target: target.to_string() }),
            Some(components) if !components.contains(component) => {
                Some(DispatchResult::TargetMissingComponent {
                    target: target.to_string(),
                    component: component.to_string(),
                })
            }
            Some(_) => None,
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CommandDispatcher for CommandRegistry {
    fn dispatch(&self, text: &str, scope: &CancellationScope) -> DispatchResult {
        let mut words = split_command_text(text).into_iter();
        let Some(name) = words.next() else {
            return DispatchResult::CommandUnknown { name: String::new() };
        };

        let descriptor = {
            let commands = self.commands.read().unwrap_or_else(PoisonError::into_inner);
            match commands.get(&name) {
                Some(descriptor) => descriptor.clone(),
                None => return DispatchResult::CommandUnknown { name },
            }
        };

        let mut raw_args: Vec<String> = words.collect();

        let target = if let Some(component) = &descriptor.component {
            if raw_args.is_empty() {
                return DispatchResult::InvalidParameterCount {
                    expected: descriptor.parameters.len() + 1,
                    found: 0,
                };
            }
            let target = raw_args.remove(0);
            if let Some(failure) = self.resolve_target(&target, component) {
                return failure;
            }
            Some(target)
        } else {
            None
        };

        if raw_args.len() != descriptor.parameters.len() {
            return DispatchResult::InvalidParameterCount {
                expected: descriptor.parameters.len(),
                found: raw_args.len(),
            };
        }

        let mut args = Vec::with_capacity(raw_args.len());
        for (position, (raw, kind)) in raw_args.into_iter().zip(&descriptor.parameters).enumerate() {
            match parse_argument(&raw, *kind) {
                Ok(arg) => args.push(arg),
                Err(reason) => return DispatchResult::InvalidParameter { position, reason },
            }
        }

        debug!(command = %name, target = ?target, args = args.len(), "Dispatching command");
        let invocation = CommandInvocation { name, target, args, scope: scope.clone() };
        DispatchResult::Succeeded((descriptor.handler)(invocation))
    }
}

fn parse_argument(raw: &str, kind: ParameterKind) -> Result<CommandArg, String> {
    match kind {
        ParameterKind::String => Ok(CommandArg::String(raw.to_string())),
        ParameterKind::Number => raw
            .parse::<f64>()
            .map(CommandArg::Number)
            .map_err(|_| format!("'{}' is not a number", raw)),
        ParameterKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(CommandArg::Bool(true)),
            "false" => Ok(CommandArg::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", raw)),
        },
    }
}

/// Splits command text into words.
///
/// Words are separated by whitespace; double quotes group words, and inside
/// quotes `\"` and `\\` escape a quote and a backslash.
pub fn split_command_text(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            '\\' if in_quotes => match chars.next() {
                Some(escaped @ ('"' | '\\')) => current.push(escaped),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_word {
        words.push(current);
    }
    words
}

async fn wait(invocation: CommandInvocation) -> Result<(), CommandError> {
    let seconds = invocation.args.first().and_then(CommandArg::as_number).unwrap_or_default();
    let duration = Duration::try_from_secs_f64(seconds).map_err(|_| {
        CommandError::InvalidArgument(format!(
            "wait duration must be a non-negative number of seconds, got {}",
            seconds
        ))
    })?;

    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        () = invocation.scope.cancelled() => {
            debug!("wait interrupted by cancellation");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn dispatch(registry: &CommandRegistry, text: &str) -> DispatchResult {
        registry.dispatch(text, &CancellationScope::new())
    }

    #[test]
    fn test_split_command_text() {
        assert_eq!(split_command_text("  move   Sally  1 "), vec!["move", "Sally", "1"]);
        assert_eq!(
            split_command_text(r#"say "hello world" "with \"quotes\"" "back\\slash""#),
            vec!["say", "hello world", r#"with "quotes""#, r"back\slash"]
        );
        assert_eq!(split_command_text(r#"set "" x"#), vec!["set", "", "x"]);
        assert!(split_command_text("   ").is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_sync_command() {
        let registry = CommandRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.add_sync_command(
            "give",
            vec![ParameterKind::String, ParameterKind::Number, ParameterKind::Bool],
            move |invocation| {
                assert_eq!(invocation.args[0].as_str(), Some("apple"));
                assert_eq!(invocation.args[1].as_number(), Some(3.0));
                assert_eq!(invocation.args[2].as_bool(), Some(true));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        match dispatch(&registry, "give apple 3 TRUE") {
            DispatchResult::Succeeded(completion) => completion.await.unwrap(),
            other => panic!("unexpected dispatch result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_command() {
        let registry = CommandRegistry::new();
        assert!(matches!(
            dispatch(&registry, "dance wildly"),
            DispatchResult::CommandUnknown { name } if name == "dance"
        ));
        assert!(matches!(dispatch(&registry, ""), DispatchResult::CommandUnknown { .. }));
    }

    #[test]
    fn test_invalid_parameter_count() {
        let registry = CommandRegistry::new();
        registry.add_sync_command("jump", vec![ParameterKind::Number], |_| Ok(()));

        assert!(matches!(
            dispatch(&registry, "jump"),
            DispatchResult::InvalidParameterCount { expected: 1, found: 0 }
        ));
        assert!(matches!(
            dispatch(&registry, "jump 1 2"),
            DispatchResult::InvalidParameterCount { expected: 1, found: 2 }
        ));
    }

    #[test]
    fn test_invalid_parameter() {
        let registry = CommandRegistry::new();
        registry.add_sync_command("toggle", vec![ParameterKind::Bool], |_| Ok(()));

        assert!(matches!(
            dispatch(&registry, "toggle maybe"),
            DispatchResult::InvalidParameter { position: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_target_commands() {
        let registry = CommandRegistry::new();
        registry.register_target("Sally", ["Animator", "Mover"]);
        registry.register_target("Rock", ["Mover"]);
        registry.add_target_command("wave", "Animator", vec![], |invocation| {
            async move {
                assert_eq!(invocation.target.as_deref(), Some("Sally"));
                Ok(())
            }
            .boxed()
        });

        assert!(matches!(
            dispatch(&registry, "wave Bob"),
            DispatchResult::NoTargetFound { target } if target == "Bob"
        ));
        assert!(matches!(
            dispatch(&registry, "wave Rock"),
            DispatchResult::TargetMissingComponent { component, .. } if component == "Animator"
        ));
        assert!(matches!(
            dispatch(&registry, "wave"),
            DispatchResult::InvalidParameterCount { expected: 1, found: 0 }
        ));
        match dispatch(&registry, "wave Sally") {
            DispatchResult::Succeeded(completion) => completion.await.unwrap(),
            other => panic!("unexpected dispatch result: {:?}", other),
        }

        assert!(registry.remove_target("Sally"));
        assert!(matches!(dispatch(&registry, "wave Sally"), DispatchResult::NoTargetFound { .. }));
    }

    #[tokio::test]
    async fn test_builtin_wait() {
        let registry = CommandRegistry::with_builtins();
        assert!(registry.contains("wait"));

        let start = Instant::now();
        match dispatch(&registry, "wait 0.05") {
            DispatchResult::Succeeded(completion) => completion.await.unwrap(),
            other => panic!("unexpected dispatch result: {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_returns_early_on_cancellation() {
        let registry = CommandRegistry::with_builtins();
        let scope = CancellationScope::new();
        scope.cancel();

        let start = Instant::now();
        match registry.dispatch("wait 10", &scope) {
            DispatchResult::Succeeded(completion) => completion.await.unwrap(),
            other => panic!("unexpected dispatch result: {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_rejects_negative_duration() {
        let registry = CommandRegistry::with_builtins();
        match dispatch(&registry, "wait -1") {
            DispatchResult::Succeeded(completion) => {
                assert!(matches!(completion.await, Err(CommandError::InvalidArgument(_))));
            }
            other => panic!("unexpected dispatch result: {:?}", other),
        }
    }

    #[test]
    fn test_remove_command() {
        let registry = CommandRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["wait".to_string()]);
        assert!(registry.remove_command("wait"));
        assert!(!registry.remove_command("wait"));
        assert!(registry.names().is_empty());
    }
}
