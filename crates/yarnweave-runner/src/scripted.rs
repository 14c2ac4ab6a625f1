//! In-memory scripted content source.
//!
//! Programs are plain serde data: a list of nodes, each a list of steps. Used by
//! the CLI and by tests that need a real [`ContentSource`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use yarnweave_abstraction::{ContentError, ContentSource, DialogueEvent, LineRef, OptionId, RawOption};

/// A program: a set of named nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Nodes in declaration order.
    pub nodes: Vec<Node>,
}

/// A named sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node name, used by `start` and `jump`.
    pub name: String,
    /// Steps run in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One step of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Deliver a line.
    Line {
        /// Line id; generated from the node and step position when absent.
        #[serde(default)]
        id: Option<String>,
        /// Text used when the line provider has no entry for the id.
        text: String,
        /// Values for `{N}` placeholders.
        #[serde(default)]
        substitutions: Vec<String>,
    },
    /// Offer a set of options.
    Options(Vec<OptionStep>),
    /// Dispatch a command.
    Command(String),
    /// Continue at the start of another node.
    Jump(String),
    /// End the dialogue.
    Stop,
}

/// One option of an options step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionStep {
    /// Line id of the option text; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Option text.
    pub text: String,
    /// Node to continue at when chosen. Execution continues after the
    /// options step when absent.
    #[serde(default)]
    pub jump: Option<String>,
    /// Whether the option may be chosen.
    #[serde(default = "default_available")]
    pub available: bool,
}

const fn default_available() -> bool {
    true
}

impl Program {
    /// Parses a program from JSON.
    ///
    /// # Errors
    /// Returns [`ContentError::InvalidProgram`] if the JSON does not describe a
    /// program.
    pub fn from_json(json: &str) -> Result<Self, ContentError> {
        serde_json::from_str(json).map_err(|e| ContentError::InvalidProgram(e.to_string()))
    }

    /// Checks node names are unique and every jump names a node.
    ///
    /// # Errors
    /// Returns [`ContentError::InvalidProgram`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ContentError> {
        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(ContentError::InvalidProgram("node with empty name".to_string()));
            }
            if !names.insert(node.name.as_str()) {
                return Err(ContentError::InvalidProgram(format!("duplicate node '{}'", node.name)));
            }
        }

        for node in &self.nodes {
            for step in &node.steps {
                let targets: Vec<&str> = match step {
                    Step::Jump(target) => vec![target.as_str()],
                    Step::Options(options) => {
                        if options.is_empty() {
                            return Err(ContentError::InvalidProgram(format!(
                                "empty options step in node '{}'",
                                node.name
                            )));
                        }
                        options.iter().filter_map(|option| option.jump.as_deref()).collect()
                    }
                    _ => Vec::new(),
                };
                if let Some(missing) = targets.into_iter().find(|target| !names.contains(target)) {
                    return Err(ContentError::InvalidProgram(format!(
                        "node '{}' jumps to unknown node '{missing}'",
                        node.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.name.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    node: usize,
    step: usize,
}

/// Content source that steps through a [`Program`].
#[derive(Debug, Default)]
pub struct ScriptedContent {
    program: Option<Program>,
    index: HashMap<String, usize>,
    cursor: Option<Cursor>,
    queued: VecDeque<DialogueEvent>,
    awaiting: Option<Vec<Option<String>>>,
}

impl ScriptedContent {
    /// Creates a source with no program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source with a program loaded.
    ///
    /// # Errors
    /// Returns an error if the program is invalid.
    pub fn with_program(program: Program) -> Result<Self, ContentError> {
        let mut content = Self::new();
        content.load_program(program)?;
        Ok(content)
    }

    fn program(&self) -> Result<&Program, ContentError> {
        self.program.as_ref().ok_or(ContentError::NoProgram)
    }

    fn node_name(&self, node: usize) -> String {
        self.program
            .as_ref()
            .and_then(|program| program.nodes.get(node))
            .map(|node| node.name.clone())
            .unwrap_or_default()
    }

    /// Leaves the current node (if any) and queues entry into `target`.
    fn enter(&mut self, target: &str) -> Result<(), ContentError> {
        let node = *self.index.get(target).ok_or_else(|| ContentError::UnknownNode(target.to_string()))?;
        if let Some(current) = self.cursor {
            self.queued.push_back(DialogueEvent::NodeComplete(self.node_name(current.node)));
        }
        debug!(node = %target, "Entering node");
        self.cursor = Some(Cursor { node, step: 0 });
        self.queued.push_back(DialogueEvent::NodeStart(target.to_string()));
        Ok(())
    }

    fn finish(&mut self) {
        if let Some(current) = self.cursor.take() {
            self.queued.push_back(DialogueEvent::NodeComplete(self.node_name(current.node)));
        }
        self.queued.push_back(DialogueEvent::DialogueComplete);
    }

    fn step(&mut self) -> Result<Option<DialogueEvent>, ContentError> {
        let Some(cursor) = self.cursor else {
            return Err(ContentError::NotRunning);
        };
        let program = self.program()?;
        let node = program.nodes.get(cursor.node).ok_or(ContentError::NotRunning)?;

        let Some(step) = node.steps.get(cursor.step).cloned() else {
            self.finish();
            return Ok(None);
        };
        let node_name = node.name.clone();
        self.cursor = Some(Cursor { step: cursor.step + 1, ..cursor });

        let event = match step {
            Step::Line { id, text, substitutions } => {
                let id = id.unwrap_or_else(|| format!("line:{node_name}-{}", cursor.step));
                Some(DialogueEvent::Line(LineRef::new(id, text).with_substitutions(substitutions)))
            }
            Step::Options(options) => {
                let raw = options
                    .iter()
                    .enumerate()
                    .map(|(i, option)| RawOption {
                        id: OptionId(i),
                        line: LineRef::new(
                            option
                                .id
                                .clone()
                                .unwrap_or_else(|| format!("line:{node_name}-{}-{i}", cursor.step)),
                            option.text.clone(),
                        ),
                        is_available: option.available,
                    })
                    .collect();
                self.awaiting = Some(options.into_iter().map(|option| option.jump).collect());
                Some(DialogueEvent::OptionSet(raw))
            }
            Step::Command(text) => Some(DialogueEvent::Command(text)),
            Step::Jump(target) => {
                self.enter(&target)?;
                None
            }
            Step::Stop => {
                self.finish();
                None
            }
        };
        Ok(event)
    }
}

impl ContentSource for ScriptedContent {
    type Program = Program;

    fn load_program(&mut self, program: Program) -> Result<(), ContentError> {
        program.validate()?;
        self.index = program.nodes.iter().enumerate().map(|(i, node)| (node.name.clone(), i)).collect();
        debug!(nodes = program.nodes.len(), "Program loaded");
        self.program = Some(program);
        self.stop();
        Ok(())
    }

    fn has_program(&self) -> bool {
        self.program.is_some()
    }

    fn node_exists(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn set_start_node(&mut self, name: &str) -> Result<(), ContentError> {
        self.program()?;
        if !self.node_exists(name) {
            return Err(ContentError::UnknownNode(name.to_string()));
        }
        self.stop();
        self.enter(name)
    }

    fn resume(&mut self) -> Result<DialogueEvent, ContentError> {
        if self.awaiting.is_some() {
            return Err(ContentError::SelectionRequired);
        }
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Ok(event);
            }
            if let Some(event) = self.step()? {
                return Ok(event);
            }
        }
    }

    fn select_option(&mut self, id: OptionId) -> Result<(), ContentError> {
        let jumps = self.awaiting.as_ref().ok_or(ContentError::NoSelectionPending)?;
        let jump = jumps.get(id.0).ok_or(ContentError::InvalidOption(id))?.clone();
        self.awaiting = None;
        debug!(option_id = %id, "Option selected");
        if let Some(target) = jump {
            self.enter(&target)?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.cursor = None;
        self.queued.clear();
        self.awaiting = None;
    }
}
