//! Runs composed workflows one step at a time.

pub mod command;
pub mod substitute;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tracing::{error, info, instrument, warn};

pub use command::{split_words, CommandInvocation, CommandRunner, ProcessCommandRunner, SplitError};
use substitute::{substitute_str, substitute_value, Scope};

use crate::context::{ExecutionContext, StepProgress};
use crate::error::{SubstitutionLeftUnresolved, WorkflowError};
use crate::registry::{panic_message, CapabilityRegistry, ProviderStatus};
use crate::result::StepResult;
use crate::workflow::{
    CommandStep, ComposedWorkflow, OnError, PluginStep, StepSpec, WorkflowComposer, WorkflowRef,
    WorkflowRefStep, WorkflowResolver,
};

/// Why a run stopped before its last step.
#[derive(Debug, Clone, PartialEq)]
pub struct HaltReason {
    pub step_index: usize,
    pub step_id: String,
    pub message: String,
    pub error_code: Option<i32>,
    pub cause: Option<String>,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} '{}' failed: {}",
            self.step_index, self.step_id, self.message
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Running,
    Halted(HaltReason),
    Completed,
}

/// What happened to one executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub index: usize,
    pub id: String,
    pub result: StepResult,
    /// An `Error` the step's `on_error = continue` policy let through.
    pub error_ignored: bool,
}

/// Outcome of running one composed workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub workflow: String,
    pub state: RunState,
    /// Message of the `Abort` that ended the run early, if any.
    pub aborted: Option<String>,
    pub steps: Vec<StepRecord>,
    pub warnings: Vec<SubstitutionLeftUnresolved>,
}

impl RunReport {
    fn new(workflow: &str) -> Self {
        Self {
            workflow: workflow.to_string(),
            state: RunState::Running,
            aborted: None,
            steps: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn halt_reason(&self) -> Option<&HaltReason> {
        match &self.state {
            RunState::Halted(reason) => Some(reason),
            _ => None,
        }
    }

    /// Collapses the run into a single result. An early `Abort` still counts
    /// as success; a halt keeps the failing step's message and exit code.
    pub fn to_step_result(&self) -> StepResult {
        match &self.state {
            RunState::Halted(reason) => {
                let location = format!(
                    "step {} '{}' of workflow '{}'",
                    reason.step_index, reason.step_id, self.workflow
                );
                StepResult::Error {
                    message: reason.message.clone(),
                    error_code: reason.error_code,
                    cause: Some(match &reason.cause {
                        Some(cause) => format!("{location}: {cause}"),
                        None => location,
                    }),
                }
            }
            _ => match &self.aborted {
                Some(message) => StepResult::success(message.clone()),
                None => StepResult::success(format!("workflow '{}' completed", self.workflow)),
            },
        }
    }
}

/// Drives composed workflows against the registry and a command runner.
#[derive(Debug)]
pub struct WorkflowExecutor<'a> {
    registry: &'a CapabilityRegistry,
    composer: WorkflowComposer<'a>,
    commands: &'a dyn CommandRunner,
}

impl<'a> WorkflowExecutor<'a> {
    pub fn new(
        registry: &'a CapabilityRegistry,
        resolver: &'a WorkflowResolver,
        commands: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            registry,
            composer: WorkflowComposer::new(resolver),
            commands,
        }
    }

    /// Resolves and composes `reference`, then runs it.
    ///
    /// Composition errors surface here, before any step has executed.
    #[instrument(skip(self, ctx), fields(workflow = %reference))]
    pub fn run_ref(
        &self,
        reference: &WorkflowRef,
        ctx: &mut ExecutionContext,
    ) -> Result<RunReport, WorkflowError> {
        let resolved = self.composer.resolver().resolve(reference)?;
        let workflow = self.composer.compose_resolved(&resolved)?;
        let mut call_stack = Vec::new();
        Ok(self.run_workflow(&workflow, resolved.key(), ctx, &mut call_stack))
    }

    /// Runs a workflow that did not come from a tiered source.
    #[instrument(skip_all, fields(workflow = %workflow.name))]
    pub fn run(&self, workflow: &ComposedWorkflow, ctx: &mut ExecutionContext) -> RunReport {
        let mut call_stack = Vec::new();
        self.run_workflow(workflow, workflow.name.clone(), ctx, &mut call_stack)
    }

    /// `call_stack` holds the `tier:name` keys of the workflows currently running.
    fn run_workflow(
        &self,
        workflow: &ComposedWorkflow,
        key: String,
        ctx: &mut ExecutionContext,
        call_stack: &mut Vec<String>,
    ) -> RunReport {
        call_stack.push(key);
        let total = workflow.steps.len();
        let mut report = RunReport::new(&workflow.name);

        for (offset, step) in workflow.steps.iter().enumerate() {
            let index = offset + 1;
            let id = step.display_id();

            if ctx.is_cancelled() {
                warn!("run of '{}' cancelled before step {}", workflow.name, index);
                report.state = RunState::Halted(HaltReason {
                    step_index: index,
                    step_id: id,
                    message: "run cancelled".to_string(),
                    error_code: None,
                    cause: None,
                });
                break;
            }

            ctx.set_progress(StepProgress {
                step_index: index,
                total_steps: total,
                workflow_name: workflow.name.clone(),
            });
            info!("[{}/{}] {}", index, total, id);

            let result =
                self.execute_step(step, index, workflow, ctx, call_stack, &mut report.warnings);
            let mut error_ignored = false;
            match &result {
                StepResult::Success { metadata, .. } | StepResult::Skip { metadata, .. } => {
                    ctx.merge(metadata);
                }
                StepResult::Abort { message, metadata } => {
                    ctx.merge(metadata);
                    info!("step {} '{}' aborted the run: {}", index, id, message);
                    report.aborted = Some(message.clone());
                }
                StepResult::Error {
                    message,
                    error_code,
                    cause,
                } => match step.on_error() {
                    OnError::Continue => {
                        warn!("step {} '{}' failed, continuing: {}", index, id, message);
                        error_ignored = true;
                    }
                    OnError::Fail => {
                        error!("step {} '{}' failed: {}", index, id, message);
                        report.state = RunState::Halted(HaltReason {
                            step_index: index,
                            step_id: id.clone(),
                            message: message.clone(),
                            error_code: *error_code,
                            cause: cause.clone(),
                        });
                    }
                },
            }

            report.steps.push(StepRecord {
                index,
                id,
                result,
                error_ignored,
            });
            if report.aborted.is_some() || report.state != RunState::Running {
                break;
            }
        }

        if report.state == RunState::Running {
            report.state = RunState::Completed;
        }
        call_stack.pop();
        report
    }

    fn execute_step(
        &self,
        step: &StepSpec,
        index: usize,
        workflow: &ComposedWorkflow,
        ctx: &mut ExecutionContext,
        call_stack: &mut Vec<String>,
        warnings: &mut Vec<SubstitutionLeftUnresolved>,
    ) -> StepResult {
        let mut unresolved = Vec::new();
        let result = match step {
            StepSpec::Plugin(plugin) => self.run_plugin(plugin, workflow, ctx, &mut unresolved),
            StepSpec::Command(command) => self.run_command(command, workflow, ctx, &mut unresolved),
            StepSpec::Workflow(nested) => self.run_nested(nested, ctx, call_stack, warnings),
        };

        for placeholder in unresolved {
            let warning = SubstitutionLeftUnresolved {
                step_index: index,
                placeholder,
            };
            if !warnings.contains(&warning) {
                warn!("{}", warning);
                warnings.push(warning);
            }
        }
        result
    }

    fn run_plugin(
        &self,
        step: &PluginStep,
        workflow: &ComposedWorkflow,
        ctx: &mut ExecutionContext,
        unresolved: &mut Vec<String>,
    ) -> StepResult {
        let scope = Scope {
            shared: ctx.shared_data(),
            params: &workflow.params,
        };
        let params = step
            .params
            .iter()
            .map(|(key, value)| (key.clone(), substitute_value(value, scope, unresolved)))
            .collect::<Vec<(String, Value)>>();

        if let Err(missing) = check_requires(&step.requires, ctx) {
            return StepResult::error(missing.to_string());
        }

        let Some(provider) = self.registry.get_provider(&step.provider) else {
            return match self.registry.status(&step.provider) {
                Some(ProviderStatus::Failed(reason)) => StepResult::Error {
                    message: format!("provider '{}' is not available", step.provider),
                    error_code: None,
                    cause: Some(reason.chain(&step.provider)),
                },
                Some(_) => StepResult::error(format!("provider '{}' is not ready", step.provider)),
                None => StepResult::error(format!("unknown provider '{}'", step.provider)),
            };
        };
        if !provider.operations().contains(&step.operation) {
            return StepResult::error(format!(
                "provider '{}' has no operation '{}'",
                step.provider, step.operation
            ));
        }

        for (key, value) in params {
            ctx.set(key, value);
        }
        let label = format!("{}.{}", step.provider, step.operation);
        dispatch(&label, || provider.call(&step.operation, ctx))
    }

    fn run_command(
        &self,
        step: &CommandStep,
        workflow: &ComposedWorkflow,
        ctx: &mut ExecutionContext,
        unresolved: &mut Vec<String>,
    ) -> StepResult {
        let scope = Scope {
            shared: ctx.shared_data(),
            params: &workflow.params,
        };
        let invocation = if step.use_shell {
            CommandInvocation::Shell(substitute_str(&step.command, scope, unresolved))
        } else {
            // Split before substituting so values can never introduce extra words.
            match split_words(&step.command) {
                Ok(words) => CommandInvocation::Argv(
                    words
                        .iter()
                        .map(|word| substitute_str(word, scope, unresolved))
                        .collect(),
                ),
                Err(e) => {
                    return StepResult::error(format!("malformed command '{}': {e}", step.command))
                }
            }
        };

        if let Err(missing) = check_requires(&step.requires, ctx) {
            return StepResult::error(missing.to_string());
        }
        if matches!(&invocation, CommandInvocation::Argv(argv) if argv.is_empty()) {
            return StepResult::error("command step has an empty command");
        }

        dispatch(&invocation.to_string(), || self.commands.run(&invocation))
    }

    fn run_nested(
        &self,
        step: &WorkflowRefStep,
        ctx: &mut ExecutionContext,
        call_stack: &mut Vec<String>,
        warnings: &mut Vec<SubstitutionLeftUnresolved>,
    ) -> StepResult {
        let resolved = match self.composer.resolver().resolve(&step.target) {
            Ok(resolved) => resolved,
            Err(e) => return StepResult::error(e.to_string()),
        };
        let key = resolved.key();
        if call_stack.contains(&key) {
            let mut chain = call_stack.clone();
            chain.push(key);
            return StepResult::error(format!("recursive workflow call: {}", chain.join(" -> ")));
        }
        let workflow = match self.composer.compose_resolved(&resolved) {
            Ok(workflow) => workflow,
            Err(e) => return StepResult::error(e.to_string()),
        };

        let saved = ctx.progress();
        let report = self.run_workflow(&workflow, key, ctx, call_stack);
        ctx.set_progress(saved);

        warnings.extend(report.warnings.iter().cloned());
        report.to_step_result()
    }
}

fn check_requires(requires: &[String], ctx: &ExecutionContext) -> Result<(), WorkflowError> {
    let keys = requires
        .iter()
        .filter(|key| !ctx.has(key))
        .cloned()
        .collect::<Vec<_>>();
    if keys.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::MissingRequiredInput { keys })
    }
}

/// Calls into provider or command code, turning errors and panics into a
/// step `Error`.
fn dispatch(step: &str, call: impl FnOnce() -> anyhow::Result<StepResult>) -> StepResult {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            let failure = WorkflowError::StepExecution {
                step: step.to_string(),
                reason: format!("{err:#}"),
            };
            StepResult::Error {
                message: failure.to_string(),
                error_code: None,
                cause: Some(err.root_cause().to_string()),
            }
        }
        Err(panic) => {
            let failure = WorkflowError::StepExecution {
                step: step.to_string(),
                reason: panic_message(panic.as_ref()),
            };
            StepResult::error(failure.to_string())
        }
    }
}
