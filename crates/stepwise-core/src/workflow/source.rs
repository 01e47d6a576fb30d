use std::collections::HashSet;
use std::fmt::Debug;

use indexmap::IndexMap;
use tracing::{debug, instrument};

use super::model::RawWorkflowDoc;
use super::reference::{Tier, WorkflowRef};
use crate::error::WorkflowError;

/// Supplies already-parsed workflow documents for one tier.
pub trait WorkflowSource: Debug {
    fn tier(&self) -> Tier;
    fn get(&self, name: &str) -> Option<RawWorkflowDoc>;
    /// Names of every document this source provides, in a stable order.
    fn names(&self) -> Vec<String>;
}

/// A workflow source backed by a map of documents.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    tier: Tier,
    definitions: IndexMap<String, RawWorkflowDoc>,
}

impl InMemorySource {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            definitions: IndexMap::new(),
        }
    }

    /// Adds a document; a later document with the same name replaces the earlier one.
    pub fn insert(&mut self, doc: RawWorkflowDoc) {
        self.definitions.insert(doc.name.clone(), doc);
    }

    pub fn with(mut self, doc: RawWorkflowDoc) -> Self {
        self.insert(doc);
        self
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl WorkflowSource for InMemorySource {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn get(&self, name: &str) -> Option<RawWorkflowDoc> {
        self.definitions.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }
}

/// A document located by the resolver, tagged with the tier it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDoc {
    pub tier: Tier,
    pub doc: RawWorkflowDoc,
}

impl ResolvedDoc {
    /// `tier:name`, unique across all sources.
    pub fn key(&self) -> String {
        format!("{}:{}", self.tier, self.doc.name)
    }
}

/// One entry of [`WorkflowResolver::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowListing {
    pub name: String,
    pub tier: Tier,
    pub description: String,
    /// True when a higher-precedence tier defines the same name.
    pub shadowed: bool,
}

/// Looks up workflow documents across tiers by precedence.
#[derive(Debug, Default)]
pub struct WorkflowResolver {
    sources: Vec<Box<dyn WorkflowSource>>,
}

impl WorkflowResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source, keeping sources ordered by tier precedence.
    ///
    /// Sources of the same tier are consulted in registration order.
    pub fn add_source(&mut self, source: Box<dyn WorkflowSource>) {
        debug!("adding {} workflow source", source.tier());
        let position = self
            .sources
            .iter()
            .position(|existing| existing.tier() > source.tier())
            .unwrap_or(self.sources.len());
        self.sources.insert(position, source);
    }

    pub fn with_source(mut self, source: impl WorkflowSource + 'static) -> Self {
        self.add_source(Box::new(source));
        self
    }

    /// Resolves a reference to a single document.
    ///
    /// A tier-qualified reference only consults that tier; otherwise the first
    /// tier defining the name wins.
    #[instrument(skip(self), fields(reference = %reference))]
    pub fn resolve(&self, reference: &WorkflowRef) -> Result<ResolvedDoc, WorkflowError> {
        let found = self
            .sources
            .iter()
            .filter(|source| reference.tier.map_or(true, |tier| source.tier() == tier))
            .find_map(|source| {
                source.get(&reference.name).map(|doc| ResolvedDoc {
                    tier: source.tier(),
                    doc,
                })
            });

        match found {
            Some(resolved) => {
                debug!("resolved workflow {}", resolved.key());
                Ok(resolved)
            }
            None => Err(WorkflowError::NotFound(reference.clone())),
        }
    }

    /// Lists every document across all sources in precedence order.
    pub fn list(&self) -> Vec<WorkflowListing> {
        let mut seen = HashSet::new();
        let mut listings = Vec::new();

        for source in &self.sources {
            for name in source.names() {
                let Some(doc) = source.get(&name) else {
                    continue;
                };
                let shadowed = !seen.insert(name.clone());
                listings.push(WorkflowListing {
                    name,
                    tier: source.tier(),
                    description: doc.description,
                    shadowed,
                });
            }
        }

        listings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn doc(name: &str, description: &str) -> RawWorkflowDoc {
        let mut doc = RawWorkflowDoc::new(name);
        doc.description = description.to_string();
        doc
    }

    fn resolver() -> WorkflowResolver {
        WorkflowResolver::new()
            .with_source(InMemorySource::new(Tier::Provider).with(doc("deploy", "from provider")))
            .with_source(
                InMemorySource::new(Tier::Project)
                    .with(doc("deploy", "from project"))
                    .with(doc("lint", "project lint")),
            )
            .with_source(InMemorySource::new(Tier::System).with(doc("release", "system release")))
    }

    #[test]
    fn unqualified_reference_prefers_project_tier() {
        let resolved = resolver()
            .resolve(&WorkflowRef::named("deploy"))
            .expect("deploy should resolve");
        assert_eq!(resolved.tier, Tier::Project);
        assert_eq!(resolved.doc.description, "from project");
    }

    #[test]
    fn qualified_reference_only_consults_its_tier() {
        let resolver = resolver();
        let resolved = resolver
            .resolve(&WorkflowRef::from_str("provider:deploy").unwrap())
            .expect("provider:deploy should resolve");
        assert_eq!(resolved.doc.description, "from provider");

        let err = resolver
            .resolve(&WorkflowRef::from_str("user:deploy").unwrap())
            .expect_err("user tier has no deploy");
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[test]
    fn falls_through_to_lower_tiers() {
        let resolved = resolver()
            .resolve(&WorkflowRef::named("release"))
            .expect("release should resolve");
        assert_eq!(resolved.tier, Tier::System);
        assert_eq!(resolved.key(), "system:release");
    }

    #[test]
    fn unknown_name_is_not_found() {
        let err = resolver()
            .resolve(&WorkflowRef::named("missing"))
            .expect_err("must fail");
        assert_eq!(err.to_string(), "workflow 'missing' not found");
    }

    #[test]
    fn list_marks_shadowed_documents() {
        let listings = resolver().list();
        let tiers = listings
            .iter()
            .map(|l| (l.name.as_str(), l.tier, l.shadowed))
            .collect::<Vec<_>>();
        assert_eq!(
            tiers,
            vec![
                ("deploy", Tier::Project, false),
                ("lint", Tier::Project, false),
                ("release", Tier::System, false),
                ("deploy", Tier::Provider, true),
            ]
        );
    }

    #[test]
    fn later_insert_replaces_document_in_same_source() {
        let source = InMemorySource::new(Tier::User)
            .with(doc("a", "first").with_param("x", json!(1)))
            .with(doc("a", "second"));
        assert_eq!(source.len(), 1);
        assert_eq!(source.get("a").unwrap().description, "second");
    }
}
