use std::io::Write;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::instrument;

use stepwise_core::workflow::{OnError, WorkflowComposer};
use stepwise_core::{
    CancellationFlag, CommandRunner, ExecutionContext, RunReport, RunState, StepSpec,
    WorkflowExecutor, WorkflowRef,
};

use crate::session::Session;
use crate::styles::{paint, result_style, DESC, ERROR, OK, WARN};

/// Parses `key=value`; the value is read as JSON when it parses, else kept as text.
pub fn parse_key_value(input: &str) -> Result<(String, Value), String> {
    let (key, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{input}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{input}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn parse_reference(workflow: &str) -> Result<WorkflowRef> {
    workflow
        .parse::<WorkflowRef>()
        .with_context(|| format!("invalid workflow reference '{workflow}'"))
}

#[instrument(skip(session, inputs, cancellation, runner, out))]
pub fn run(
    session: &Session,
    workflow: &str,
    inputs: &[(String, Value)],
    cancellation: CancellationFlag,
    runner: &dyn CommandRunner,
    out: &mut dyn Write,
) -> Result<RunReport> {
    session.ensure_required_ready()?;
    let reference = parse_reference(workflow)?;

    let mut builder = ExecutionContext::builder()
        .with_registry(&session.registry)
        .with_secrets(session.secrets.clone())
        .with_cancellation(cancellation);
    for (key, value) in inputs {
        builder = builder.with_data(key.clone(), value.clone());
    }
    let mut ctx = builder.build();

    let executor = WorkflowExecutor::new(&session.registry, &session.resolver, runner);
    let report = executor.run_ref(&reference, &mut ctx)?;
    write_report(&report, out)?;
    Ok(report)
}

fn write_report(report: &RunReport, out: &mut dyn Write) -> Result<()> {
    for record in &report.steps {
        let mut label = record.result.kind().to_string();
        if record.error_ignored {
            label.push_str(" (ignored)");
        }
        writeln!(
            out,
            "[{}] {} {} {}",
            record.index,
            paint(result_style(&record.result), format!("{label:<7}")),
            record.id,
            paint(DESC, record.result.message())
        )?;
    }
    for warning in &report.warnings {
        writeln!(out, "{} {}", paint(WARN, "warning:"), warning)?;
    }

    match &report.state {
        RunState::Halted(reason) => {
            writeln!(out, "{} {}", paint(ERROR, "halted:"), reason)?;
            if let Some(cause) = &reason.cause {
                writeln!(out, "  caused by: {cause}")?;
            }
        }
        _ => match &report.aborted {
            Some(message) => writeln!(out, "{} {}", paint(WARN, "aborted:"), message)?,
            None => writeln!(
                out,
                "{} workflow '{}' completed",
                paint(OK, "done:"),
                report.workflow
            )?,
        },
    }
    Ok(())
}

pub fn list(session: &Session, out: &mut dyn Write) -> Result<()> {
    for listing in session.resolver.list() {
        let name = format!("{}:{}", listing.tier, listing.name);
        let note = if listing.shadowed { " (shadowed)" } else { "" };
        writeln!(
            out,
            "{:<32} {}{}",
            name,
            paint(DESC, &listing.description),
            note
        )?;
    }
    Ok(())
}

/// Prints the composed step list of `workflow`.
pub fn show(session: &Session, workflow: &str, out: &mut dyn Write) -> Result<()> {
    let reference = parse_reference(workflow)?;
    let resolved = session.resolver.resolve(&reference)?;
    let composed = WorkflowComposer::new(&session.resolver).compose_resolved(&resolved)?;

    writeln!(out, "{} ({})", composed.name, resolved.tier)?;
    if !composed.description.is_empty() {
        writeln!(out, "  {}", paint(DESC, &composed.description))?;
    }
    for (key, value) in &composed.params {
        writeln!(out, "  param {key} = {value}")?;
    }
    for (offset, step) in composed.steps.iter().enumerate() {
        writeln!(
            out,
            "{:>3}. {:<20} {}{}",
            offset + 1,
            step.display_id(),
            describe(step),
            match step.on_error() {
                OnError::Continue => " (continue on error)",
                OnError::Fail => "",
            }
        )?;
    }
    Ok(())
}

fn describe(step: &StepSpec) -> String {
    match step {
        StepSpec::Plugin(plugin) => format!("{}.{}", plugin.provider, plugin.operation),
        StepSpec::Command(command) if command.use_shell => format!("sh -c {}", command.command),
        StepSpec::Command(command) => format!("$ {}", command.command),
        StepSpec::Workflow(nested) => format!("workflow {}", nested.target),
    }
}

pub fn providers(session: &Session, out: &mut dyn Write) -> Result<()> {
    let state = session.registry.state();
    for id in &state.ready {
        let operations = session
            .registry
            .descriptor(id)
            .map(|descriptor| descriptor.operations.join(", "))
            .unwrap_or_default();
        writeln!(out, "{} {:<16} {}", paint(OK, "ready "), id, paint(DESC, operations))?;
    }
    for (id, reason) in &state.failed {
        writeln!(out, "{} {:<16} {}", paint(ERROR, "failed"), id, reason.chain(id))?;
    }
    for id in &state.pending {
        writeln!(out, "{} {}", paint(WARN, "pending"), id)?;
    }
    Ok(())
}
