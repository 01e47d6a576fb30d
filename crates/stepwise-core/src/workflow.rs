//! Workflow documents, tiered lookup and composition.

pub mod compose;
pub mod document;
pub mod model;
pub mod reference;
pub mod source;

pub use compose::WorkflowComposer;
pub use model::{
    CommandStep, ComposedWorkflow, OnError, PluginStep, RawWorkflowDoc, StepEntry, StepSpec,
    WorkflowRefStep, AFTER_HOOK,
};
pub use reference::{ReferenceParseError, Tier, WorkflowRef};
pub use source::{InMemorySource, ResolvedDoc, WorkflowListing, WorkflowResolver, WorkflowSource};
