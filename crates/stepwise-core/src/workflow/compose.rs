use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::model::{ComposedWorkflow, RawWorkflowDoc, StepEntry, AFTER_HOOK};
use super::reference::WorkflowRef;
use super::source::{ResolvedDoc, WorkflowResolver};
use crate::error::WorkflowError;

/// A workflow whose `extends` chain is inlined but whose own hook markers are
/// still in place, so an extending document can splice into them.
#[derive(Debug)]
struct OpenWorkflow {
    name: String,
    description: String,
    params: IndexMap<String, Value>,
    hook_points: Vec<String>,
    entries: Vec<StepEntry>,
}

impl OpenWorkflow {
    fn declares_hook(&self, hook: &str) -> bool {
        hook == AFTER_HOOK || self.hook_points.iter().any(|declared| declared == hook)
    }

    fn close(self) -> ComposedWorkflow {
        let mut steps = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            match entry {
                StepEntry::Step(step) => steps.push(step),
                StepEntry::Hook(hook) => {
                    debug!("hook '{}' of '{}' has no injected steps", hook, self.name)
                }
            }
        }

        ComposedWorkflow {
            name: self.name,
            description: self.description,
            params: self.params,
            steps,
        }
    }
}

/// Resolves `extends` chains and hook injections into a single step list.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowComposer<'a> {
    resolver: &'a WorkflowResolver,
}

impl<'a> WorkflowComposer<'a> {
    pub fn new(resolver: &'a WorkflowResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &'a WorkflowResolver {
        self.resolver
    }

    /// Resolves `reference` through the resolver and composes it.
    pub fn compose_ref(&self, reference: &WorkflowRef) -> Result<ComposedWorkflow, WorkflowError> {
        let resolved = self.resolver.resolve(reference)?;
        self.compose_resolved(&resolved)
    }

    pub fn compose_resolved(
        &self,
        resolved: &ResolvedDoc,
    ) -> Result<ComposedWorkflow, WorkflowError> {
        let mut visited = IndexSet::new();
        self.open(&resolved.doc, resolved.key(), &mut visited)
            .map(OpenWorkflow::close)
    }

    /// Composes a document that did not come from a tiered source.
    #[instrument(skip(self, doc), fields(workflow = %doc.name))]
    pub fn compose(&self, doc: &RawWorkflowDoc) -> Result<ComposedWorkflow, WorkflowError> {
        let mut visited = IndexSet::new();
        self.open(doc, doc.name.clone(), &mut visited)
            .map(OpenWorkflow::close)
    }

    fn open(
        &self,
        doc: &RawWorkflowDoc,
        key: String,
        visited: &mut IndexSet<String>,
    ) -> Result<OpenWorkflow, WorkflowError> {
        if visited.contains(&key) {
            let mut chain = visited.iter().cloned().collect::<Vec<_>>();
            chain.push(key);
            return Err(WorkflowError::CyclicExtends { chain });
        }
        visited.insert(key);

        let Some(base_ref) = &doc.extends else {
            return standalone(doc);
        };

        if !doc.steps.is_empty() {
            return Err(WorkflowError::invalid(
                &doc.name,
                format!(
                    "extends '{base_ref}' and must inject steps through hooks \
                     instead of declaring its own"
                ),
            ));
        }

        let base = self.resolver.resolve(base_ref)?;
        debug!("'{}' extends {}", doc.name, base.key());
        let base = self.open(&base.doc, base.key(), visited)?;

        for (hook, injected) in &doc.hook_injections {
            if !base.declares_hook(hook) {
                return Err(WorkflowError::invalid(
                    &doc.name,
                    format!("injects into hook '{hook}' which '{}' does not declare", base.name),
                ));
            }
            validate_markers(doc, injected)?;
        }

        let mut entries = Vec::with_capacity(base.entries.len());
        let mut after_placed = false;
        for entry in base.entries {
            match entry {
                StepEntry::Hook(hook) => {
                    after_placed |= hook == AFTER_HOOK;
                    if let Some(injected) = doc.hook_injections.get(&hook) {
                        entries.extend(injected.iter().cloned());
                    }
                }
                step => entries.push(step),
            }
        }
        if !after_placed {
            if let Some(injected) = doc.hook_injections.get(AFTER_HOOK) {
                entries.extend(injected.iter().cloned());
            }
        }

        let mut params = base.params;
        for (key, value) in &doc.params {
            params.insert(key.clone(), value.clone());
        }

        let description = if doc.description.is_empty() {
            base.description
        } else {
            doc.description.clone()
        };

        Ok(OpenWorkflow {
            name: doc.name.clone(),
            description,
            params,
            hook_points: doc.hook_points.clone(),
            entries,
        })
    }
}

fn standalone(doc: &RawWorkflowDoc) -> Result<OpenWorkflow, WorkflowError> {
    validate_markers(doc, &doc.steps)?;
    if !doc.hook_injections.is_empty() {
        warn!(
            "'{}' injects into hooks but extends nothing; injections ignored",
            doc.name
        );
    }

    Ok(OpenWorkflow {
        name: doc.name.clone(),
        description: doc.description.clone(),
        params: doc.params.clone(),
        hook_points: doc.hook_points.clone(),
        entries: doc.steps.clone(),
    })
}

fn validate_markers(doc: &RawWorkflowDoc, entries: &[StepEntry]) -> Result<(), WorkflowError> {
    for entry in entries {
        if let StepEntry::Hook(hook) = entry {
            if !doc.declares_hook(hook) {
                return Err(WorkflowError::invalid(
                    &doc.name,
                    format!("references undeclared hook point '{hook}'"),
                ));
            }
        }
    }
    Ok(())
}
