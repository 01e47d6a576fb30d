use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::WorkflowRef;

/// Errors raised while resolving, loading or composing a workflow.
///
/// Resolution and composition errors are fatal to the one workflow being
/// prepared and are raised before any of its steps execute.
/// `MissingRequiredInput` and `StepExecution` never escape a run: the executor
/// renders them into a [`crate::StepResult::Error`] for the failing step.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' not found")]
    NotFound(WorkflowRef),

    #[error("invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("cyclic extends chain: {}", chain.join(" -> "))]
    CyclicExtends { chain: Vec<String> },

    #[error("missing required input: {}", keys.join(", "))]
    MissingRequiredInput { keys: Vec<String> },

    #[error("step '{step}' failed: {reason}")]
    StepExecution { step: String, reason: String },

    #[error("invalid workflow reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("failed to load workflow document '{}': {reason}", path.display())]
    Document { path: PathBuf, reason: String },
}

impl WorkflowError {
    pub(crate) fn invalid(workflow: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkflow {
            workflow: workflow.into(),
            reason: reason.into(),
        }
    }
}

/// Warning emitted when a `${key}` placeholder finds no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("placeholder '${{{placeholder}}}' in step {step_index} left unresolved")]
pub struct SubstitutionLeftUnresolved {
    pub step_index: usize,
    pub placeholder: String,
}
