//! Core logic and abstractions for Stepwise.
//!
//! This crate defines the capability registry, tiered workflow resolution and
//! composition, the execution context, and the executor that runs composed
//! workflows step by step.

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod executor;
pub mod registry;
pub mod result;
pub mod secrets;
pub mod workflow;

pub use config::{ProviderConfig, ProviderSettings, ProviderSource, StepwiseConfig};
pub use context::{CancellationFlag, ClientHandle, ExecutionContext, ExecutionContextBuilder};
pub use error::{SubstitutionLeftUnresolved, WorkflowError};
pub use executor::{
    CommandInvocation, CommandRunner, HaltReason, ProcessCommandRunner, RunReport, RunState,
    StepRecord, WorkflowExecutor,
};
pub use registry::{
    CapabilityProvider, CapabilityRegistry, FailureReason, ProviderCatalog, ProviderDescriptor,
    ProviderStatus, RegistryState, StaticCatalog,
};
pub use result::{Metadata, StepResult};
pub use secrets::{EnvSecretStore, SecretStore, StaticSecrets};
pub use workflow::{
    ComposedWorkflow, RawWorkflowDoc, StepSpec, Tier, WorkflowComposer, WorkflowRef,
    WorkflowResolver,
};
