use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::reference::WorkflowRef;

/// Hook point that always exists at the end of a base workflow.
pub const AFTER_HOOK: &str = "after";

/// What the executor does when a step returns `Error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Fail,
    Continue,
}

/// Calls one operation on a capability provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginStep {
    pub id: Option<String>,
    pub provider: String,
    pub operation: String,
    pub params: IndexMap<String, Value>,
    pub on_error: OnError,
    pub requires: Vec<String>,
}

/// Runs an external command built from a template.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStep {
    pub id: Option<String>,
    pub command: String,
    pub on_error: OnError,
    pub use_shell: bool,
    pub requires: Vec<String>,
}

/// Runs another workflow to completion, sharing the caller's data.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRefStep {
    pub id: Option<String>,
    pub target: WorkflowRef,
    pub on_error: OnError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    Plugin(PluginStep),
    Command(CommandStep),
    Workflow(WorkflowRefStep),
}

impl StepSpec {
    /// Identifier used in logs and run reports.
    ///
    /// Falls back to a description of the step when no explicit id is set.
    pub fn display_id(&self) -> String {
        match self {
            Self::Plugin(step) => step
                .id
                .clone()
                .unwrap_or_else(|| format!("{}.{}", step.provider, step.operation)),
            Self::Command(step) => step.id.clone().unwrap_or_else(|| {
                step.command
                    .split_whitespace()
                    .next()
                    .unwrap_or("command")
                    .to_string()
            }),
            Self::Workflow(step) => step
                .id
                .clone()
                .unwrap_or_else(|| format!("workflow:{}", step.target)),
        }
    }

    pub fn on_error(&self) -> OnError {
        match self {
            Self::Plugin(step) => step.on_error,
            Self::Command(step) => step.on_error,
            Self::Workflow(step) => step.on_error,
        }
    }

    pub fn requires(&self) -> &[String] {
        match self {
            Self::Plugin(step) => &step.requires,
            Self::Command(step) => &step.requires,
            Self::Workflow(_) => &[],
        }
    }
}

/// One entry of an uncomposed step sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEntry {
    Step(StepSpec),
    Hook(String),
}

/// A workflow document as delivered by a source, before composition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawWorkflowDoc {
    pub name: String,
    pub description: String,
    pub params: IndexMap<String, Value>,
    /// Hook points this document exposes to workflows extending it.
    pub hook_points: Vec<String>,
    pub extends: Option<WorkflowRef>,
    /// Steps this document splices into its base's hook points.
    pub hook_injections: IndexMap<String, Vec<StepEntry>>,
    pub steps: Vec<StepEntry>,
}

impl RawWorkflowDoc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether `hook` may be referenced by a marker in this document.
    pub fn declares_hook(&self, hook: &str) -> bool {
        hook == AFTER_HOOK || self.hook_points.iter().any(|declared| declared == hook)
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(StepEntry::Step(step));
        self
    }

    pub fn with_hook_marker(mut self, hook: impl Into<String>) -> Self {
        let hook = hook.into();
        if !self.hook_points.contains(&hook) {
            self.hook_points.push(hook.clone());
        }
        self.steps.push(StepEntry::Hook(hook));
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn extending(mut self, base: WorkflowRef) -> Self {
        self.extends = Some(base);
        self
    }

    pub fn injecting(mut self, hook: impl Into<String>, steps: Vec<StepEntry>) -> Self {
        self.hook_injections.insert(hook.into(), steps);
        self
    }
}

/// A workflow with `extends` inlined and every hook marker resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedWorkflow {
    pub name: String,
    pub description: String,
    pub params: IndexMap<String, Value>,
    pub steps: Vec<StepSpec>,
}

impl From<ComposedWorkflow> for RawWorkflowDoc {
    fn from(composed: ComposedWorkflow) -> Self {
        Self {
            name: composed.name,
            description: composed.description,
            params: composed.params,
            hook_points: Vec::new(),
            extends: None,
            hook_injections: IndexMap::new(),
            steps: composed.steps.into_iter().map(StepEntry::Step).collect(),
        }
    }
}

/// Shorthand constructors used by builtin providers and tests.
impl PluginStep {
    pub fn new(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: None,
            provider: provider.into(),
            operation: operation.into(),
            params: IndexMap::new(),
            on_error: OnError::Fail,
            requires: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.requires.push(key.into());
        self
    }
}

impl From<PluginStep> for StepSpec {
    fn from(step: PluginStep) -> Self {
        Self::Plugin(step)
    }
}

impl From<PluginStep> for StepEntry {
    fn from(step: PluginStep) -> Self {
        Self::Step(StepSpec::Plugin(step))
    }
}
