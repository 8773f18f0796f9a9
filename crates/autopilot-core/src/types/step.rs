//! Steps: named units of work executed by the engine.

use core::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::StepId;

/// Opaque step configuration.
pub type Parameters = Map<String, Value>;

/// Closed set of step kinds the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Emit a message without calling any capability.
    Message,
    /// Suspend until the user supplies input.
    WaitForInput,
    /// Ask the language model for a completion.
    ModelComplete,
    /// Edit a file through the editor capability.
    EditFile,
    /// Run a named validator against the latest committed entry.
    RunValidator,
    /// Run child steps sequentially as nested steps.
    Composite,
}

impl StepKind {
    /// Every step kind, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Message,
        Self::WaitForInput,
        Self::ModelComplete,
        Self::EditFile,
        Self::RunValidator,
        Self::Composite,
    ];

    /// Human-readable name used when a step has no explicit name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Message => "Message",
            Self::WaitForInput => "Wait for input",
            Self::ModelComplete => "Model completion",
            Self::EditFile => "Edit file",
            Self::RunValidator => "Run validator",
            Self::Composite => "Sequence",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.display_name())
    }
}

/// A named unit of work.
///
/// Steps are built by a policy or by static composition and are executed at most
/// once per attempt. The engine never mutates a step it has been handed; the
/// snapshot recorded in history carries the children that actually ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Identifier of this step instance
    #[serde(default)]
    pub id: StepId,
    /// Display name; empty means "use the kind's display name"
    #[serde(default)]
    pub name: String,
    /// What the step does
    pub kind: StepKind,
    /// Optional human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Kind-specific configuration
    #[serde(default)]
    pub parameters: Parameters,
    /// Whether observers should hide this step
    #[serde(default)]
    pub hide: bool,
    /// Per-step retry bound; `None` uses the engine default
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Per-attempt timeout override in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Ordered child steps
    #[serde(default)]
    pub children: Vec<Step>,
}

impl Step {
    /// Creates an empty step of the given kind.
    #[must_use]
    pub fn new(kind: StepKind) -> Self {
        Self {
            id: StepId::new(),
            name: String::new(),
            kind,
            description: None,
            parameters: Parameters::new(),
            hide: false,
            max_attempts: None,
            timeout_ms: None,
            children: Vec::new(),
        }
    }

    /// A step that emits `text`.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Self::new(StepKind::Message).with_param("text", Value::String(text.into()))
    }

    /// A step that waits for the user, showing `prompt`.
    #[must_use]
    pub fn wait_for_input(prompt: impl Into<String>) -> Self {
        Self::new(StepKind::WaitForInput).with_param("prompt", Value::String(prompt.into()))
    }

    /// A step that asks the language model to complete `prompt`.
    #[must_use]
    pub fn model_complete(prompt: impl Into<String>) -> Self {
        Self::new(StepKind::ModelComplete).with_param("prompt", Value::String(prompt.into()))
    }

    /// A step that applies `instruction` to the file at `path`.
    #[must_use]
    pub fn edit_file(path: &Path, instruction: impl Into<String>) -> Self {
        Self::new(StepKind::EditFile)
            .with_param("path", path.display().to_string())
            .with_param("instruction", Value::String(instruction.into()))
    }

    /// A step that runs the validator registered as `name`.
    #[must_use]
    pub fn run_validator(name: impl Into<String>, parameters: Value) -> Self {
        Self::new(StepKind::RunValidator)
            .with_param("validator", Value::String(name.into()))
            .with_param("parameters", parameters)
    }

    /// A composite step running `steps` in order.
    #[must_use]
    pub fn sequence(steps: Vec<Self>) -> Self {
        let mut step = Self::new(StepKind::Composite);
        step.hide = true;
        step.children = steps;
        step
    }

    /// Sequential composition: `self` then `next`.
    ///
    /// Composites on either side are flattened so chaining `a.then(b).then(c)`
    /// yields a single sequence of three children.
    #[must_use]
    pub fn then(self, next: Self) -> Self {
        let mut steps = if self.is_plain_sequence() {
            self.children
        } else {
            vec![self]
        };
        if next.is_plain_sequence() {
            steps.extend(next.children);
        } else {
            steps.push(next);
        }
        Self::sequence(steps)
    }

    fn is_plain_sequence(&self) -> bool {
        self.kind == StepKind::Composite && self.name.is_empty() && self.parameters.is_empty()
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets a single parameter.
    #[must_use]
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_owned(), value.into());
        self
    }

    /// Replaces all parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Marks the step hidden from observers.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hide = true;
        self
    }

    /// Sets the per-step retry bound (at least one attempt is always made).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Appends a child step.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Overrides the identifier.
    #[must_use]
    pub fn with_id(mut self, id: StepId) -> Self {
        self.id = id;
        self
    }

    /// Name shown to observers.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.kind.display_name()
        } else {
            &self.name
        }
    }

    /// String parameter lookup.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Boolean parameter lookup.
    #[must_use]
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }
}
