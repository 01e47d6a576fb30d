//! TOML workflow documents.
//!
//! A document either declares its own `steps` or extends another workflow and
//! injects steps into its hook points:
//!
//! ```toml
//! name = "deploy"
//! extends = "system:release"
//!
//! [params]
//! env = "staging"
//!
//! [[hooks.before]]
//! id = "notify"
//! plugin = "std.echo"
//! params = { message = "deploying ${env}" }
//! ```
//!
//! `hooks` is a list when a document declares hook points and a table of step
//! lists when it injects; in the table form the declared hook points are the
//! `hook` markers used inside the injected lists.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::model::{
    CommandStep, OnError, PluginStep, RawWorkflowDoc, StepEntry, StepSpec, WorkflowRefStep,
};
use super::reference::{Tier, WorkflowRef};
use super::source::{InMemorySource, WorkflowSource};
use crate::constants::WORKFLOW_FILE_EXTENSION;
use crate::error::WorkflowError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowDocument {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    params: IndexMap<String, Value>,
    extends: Option<WorkflowRef>,
    hooks: Option<HooksField>,
    #[serde(default)]
    steps: Vec<StepDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HooksField {
    Declare(Vec<String>),
    Inject(IndexMap<String, Vec<StepDocument>>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDocument {
    id: Option<String>,
    plugin: Option<String>,
    command: Option<String>,
    workflow: Option<WorkflowRef>,
    hook: Option<String>,
    #[serde(default)]
    params: IndexMap<String, Value>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    on_error: OnError,
    #[serde(default)]
    shell: bool,
}

impl StepDocument {
    fn into_entry(self, workflow: &str) -> Result<StepEntry, WorkflowError> {
        let kinds = [
            self.plugin.is_some(),
            self.command.is_some(),
            self.workflow.is_some(),
            self.hook.is_some(),
        ];
        let label = self.id.clone().unwrap_or_else(|| "<unnamed>".to_string());
        let ambiguous = || {
            WorkflowError::invalid(
                workflow,
                format!("step '{label}' must set exactly one of plugin, command, workflow or hook"),
            )
        };
        if kinds.iter().filter(|set| **set).count() != 1 {
            return Err(ambiguous());
        }

        if let Some(hook) = self.hook {
            return Ok(StepEntry::Hook(hook));
        }

        let spec = if let Some(target) = self.plugin {
            let Some((provider, operation)) = target.split_once('.') else {
                return Err(WorkflowError::invalid(
                    workflow,
                    format!(
                        "step '{label}' plugin '{target}' must be written as provider.operation"
                    ),
                ));
            };
            StepSpec::Plugin(PluginStep {
                id: self.id,
                provider: provider.to_string(),
                operation: operation.to_string(),
                params: self.params,
                on_error: self.on_error,
                requires: self.requires,
            })
        } else if let Some(command) = self.command {
            StepSpec::Command(CommandStep {
                id: self.id,
                command,
                on_error: self.on_error,
                use_shell: self.shell,
                requires: self.requires,
            })
        } else if let Some(target) = self.workflow {
            StepSpec::Workflow(WorkflowRefStep {
                id: self.id,
                target,
                on_error: self.on_error,
            })
        } else {
            return Err(ambiguous());
        };

        Ok(StepEntry::Step(spec))
    }
}

fn convert_entries(
    steps: Vec<StepDocument>,
    workflow: &str,
) -> Result<Vec<StepEntry>, WorkflowError> {
    steps
        .into_iter()
        .map(|step| step.into_entry(workflow))
        .collect()
}

/// Parses one TOML document. `origin` names the document when it has no
/// `name` field and is used in error messages.
pub fn parse_workflow_document(text: &str, origin: &Path) -> Result<RawWorkflowDoc, WorkflowError> {
    let document = toml::from_str::<WorkflowDocument>(text).map_err(|e| WorkflowError::Document {
        path: origin.to_path_buf(),
        reason: e.to_string(),
    })?;

    let name = match document.name {
        Some(name) => name,
        None => origin
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .ok_or_else(|| WorkflowError::Document {
                path: origin.to_path_buf(),
                reason: "document has no name".to_string(),
            })?,
    };

    let steps = convert_entries(document.steps, &name)?;
    let (hook_points, hook_injections) = match document.hooks {
        None => (Vec::new(), IndexMap::new()),
        Some(HooksField::Declare(points)) => (points, IndexMap::new()),
        Some(HooksField::Inject(map)) => {
            let mut injections = IndexMap::new();
            let mut points = Vec::new();
            for (hook, entries) in map {
                let entries = convert_entries(entries, &name)?;
                for entry in &entries {
                    if let StepEntry::Hook(marker) = entry {
                        if !points.contains(marker) {
                            points.push(marker.clone());
                        }
                    }
                }
                injections.insert(hook, entries);
            }
            (points, injections)
        }
    };

    Ok(RawWorkflowDoc {
        name,
        description: document.description,
        params: document.params,
        hook_points,
        extends: document.extends,
        hook_injections,
        steps,
    })
}

pub fn load_workflow_file(path: &Path) -> Result<RawWorkflowDoc, WorkflowError> {
    let text = std::fs::read_to_string(path).map_err(|e| WorkflowError::Document {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_workflow_document(&text, path)
}

/// Loads every `*.toml` document in `dir` into a source for `tier`.
///
/// A missing directory yields an empty source. Files are read in name order
/// and the first document with a given name wins.
pub fn load_directory(tier: Tier, dir: &Path) -> Result<InMemorySource, WorkflowError> {
    let mut source = InMemorySource::new(tier);
    if !dir.is_dir() {
        debug!("{} workflow directory {} is absent", tier, dir.display());
        return Ok(source);
    }

    let read_error = |e: std::io::Error| WorkflowError::Document {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(WORKFLOW_FILE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let doc = load_workflow_file(&path)?;
        if source.get(&doc.name).is_some() {
            warn!(
                "duplicate {} workflow '{}' in {} ignored",
                tier,
                doc.name,
                path.display()
            );
            continue;
        }
        debug!("loaded {} workflow '{}' from {}", tier, doc.name, path.display());
        source.insert(doc);
    }

    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn origin() -> PathBuf {
        PathBuf::from("deploy.toml")
    }

    #[test]
    fn parses_steps_of_every_kind() {
        let text = r#"
description = "Ship it"
hooks = ["before"]

[params]
env = "staging"

[[steps]]
id = "checkout"
plugin = "git.checkout"
requires = ["branch"]
on_error = "continue"
params = { depth = 1 }

[[steps]]
hook = "before"

[[steps]]
command = "cargo build --release"

[[steps]]
workflow = "system:notify"
"#;
        let doc = parse_workflow_document(text, &origin()).expect("document should parse");
        assert_eq!(doc.name, "deploy");
        assert_eq!(doc.params.get("env"), Some(&json!("staging")));
        assert_eq!(doc.hook_points, vec!["before"]);
        assert_eq!(doc.steps.len(), 4);

        match &doc.steps[0] {
            StepEntry::Step(StepSpec::Plugin(step)) => {
                assert_eq!(step.provider, "git");
                assert_eq!(step.operation, "checkout");
                assert_eq!(step.on_error, OnError::Continue);
                assert_eq!(step.requires, vec!["branch"]);
                assert_eq!(step.params.get("depth"), Some(&json!(1)));
            }
            other => panic!("unexpected entry: {other:?}"),
        }
        assert_eq!(doc.steps[1], StepEntry::Hook("before".to_string()));
        match &doc.steps[3] {
            StepEntry::Step(StepSpec::Workflow(step)) => {
                assert_eq!(step.target, WorkflowRef::in_tier(Tier::System, "notify"))
            }
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn injection_table_declares_nested_markers() {
        let text = r#"
name = "middle"
extends = "base"

[[hooks.before]]
plugin = "std.echo"

[[hooks.before]]
hook = "pre"
"#;
        let doc = parse_workflow_document(text, &origin()).unwrap();
        assert_eq!(doc.extends, Some(WorkflowRef::named("base")));
        assert_eq!(doc.hook_points, vec!["pre"]);
        assert_eq!(doc.hook_injections["before"].len(), 2);
    }

    #[test]
    fn rejects_step_with_two_kinds() {
        let text = r#"
[[steps]]
id = "confused"
plugin = "std.echo"
command = "echo hi"
"#;
        let err = parse_workflow_document(text, &origin()).expect_err("must fail");
        assert!(err.to_string().contains("exactly one of"));
    }

    #[test]
    fn rejects_plugin_without_operation() {
        let text = r#"
[[steps]]
plugin = "std"
"#;
        let err = parse_workflow_document(text, &origin()).expect_err("must fail");
        assert!(err.to_string().contains("provider.operation"));
    }

    #[test]
    fn reports_toml_errors_with_path() {
        let err = parse_workflow_document("steps = 3", &origin()).expect_err("must fail");
        assert!(matches!(err, WorkflowError::Document { .. }));
        assert!(err.to_string().contains("deploy.toml"));
    }

    #[test]
    fn loads_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.toml"), "description = \"b\"\n").unwrap();
        let text = "name = \"b\"\ndescription = \"a wins\"\n";
        std::fs::write(dir.path().join("a.toml"), text).unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let source = load_directory(Tier::Project, dir.path()).expect("directory should load");
        assert_eq!(source.names(), vec!["b"]);
        assert_eq!(source.get("b").unwrap().description, "a wins");
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = load_directory(Tier::User, &dir.path().join("nope")).unwrap();
        assert!(source.is_empty());
    }
}
