use std::collections::HashSet;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::Result;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ProviderSettings, StepwiseConfig};
use crate::context::{ClientHandle, ExecutionContext};
use crate::result::StepResult;
use crate::secrets::SecretStore;
use crate::workflow::{InMemorySource, RawWorkflowDoc, Tier, WorkflowSource};

pub mod subprocess;

/// A contract for every capability provider plugged into Stepwise.
pub trait CapabilityProvider: Debug {
    /// Unique id of the provider, used by `provider.operation` step references.
    fn id(&self) -> &str;

    /// Ids of providers that must be ready before this one initializes.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of the operations steps may call.
    fn operations(&self) -> Vec<String>;

    /// Prepares the provider. Called once, after all dependencies are ready.
    fn initialize(
        &mut self,
        _settings: &ProviderSettings,
        _secrets: &dyn SecretStore,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs `operation`; all inputs arrive through the context's shared data.
    fn call(&self, operation: &str, ctx: &mut ExecutionContext) -> Result<StepResult>;

    /// Client object exposed to steps through the execution context.
    fn client(&self) -> Option<ClientHandle> {
        None
    }

    /// Workflow documents contributed to the provider tier.
    fn workflows(&self) -> Vec<RawWorkflowDoc> {
        Vec::new()
    }
}

/// Static description of a discovered provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: String,
    pub dependencies: Vec<String>,
    pub operations: Vec<String>,
}

/// Source of installable providers.
pub trait ProviderCatalog {
    /// Hands over every provider the catalog knows about.
    fn discover(&mut self) -> Result<Vec<Box<dyn CapabilityProvider>>>;
}

/// A catalog of providers compiled into the binary.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    providers: Vec<Box<dyn CapabilityProvider>>,
}

impl StaticCatalog {
    pub fn with(mut self, provider: impl CapabilityProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn push(&mut self, provider: Box<dyn CapabilityProvider>) {
        self.providers.push(provider);
    }
}

impl ProviderCatalog for StaticCatalog {
    fn discover(&mut self) -> Result<Vec<Box<dyn CapabilityProvider>>> {
        Ok(std::mem::take(&mut self.providers))
    }
}

/// Why a provider ended up failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("initialization failed: {0}")]
    InitFailed(String),
    #[error("dependency '{dependency}' failed")]
    DependencyFailed {
        dependency: String,
        cause: Box<FailureReason>,
    },
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("unresolved dependency '{dependency}'")]
    UnresolvedDependency { dependency: String },
}

impl FailureReason {
    /// Full root-cause chain for provider `id`, e.g.
    /// `x failed because dependency y failed because y's initialization raised boom`.
    pub fn chain(&self, id: &str) -> String {
        format!("{id} failed because {}", self.because(id))
    }

    fn because(&self, id: &str) -> String {
        match self {
            Self::InitFailed(message) => format!("{id}'s initialization raised {message}"),
            Self::DependencyFailed { dependency, cause } => {
                format!(
                    "dependency {dependency} failed because {}",
                    cause.because(dependency)
                )
            }
            Self::CyclicDependency { cycle } => {
                format!("{id} is part of dependency cycle {}", cycle.join(" -> "))
            }
            Self::UnresolvedDependency { dependency } => {
                format!("{id} depends on unknown provider {dependency}")
            }
        }
    }

    /// The innermost reason, following dependency failures.
    pub fn root_cause(&self) -> &FailureReason {
        match self {
            Self::DependencyFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Pending,
    Ready,
    Failed(FailureReason),
}

/// Snapshot of where every provider stands. Each id appears in exactly one set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryState {
    pub ready: Vec<String>,
    pub failed: IndexMap<String, FailureReason>,
    pub pending: Vec<String>,
}

#[derive(Debug)]
struct Entry {
    provider: Box<dyn CapabilityProvider>,
    dependencies: Vec<String>,
    status: ProviderStatus,
}

/// Registry of capability providers, initialized in dependency order.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: IndexMap<String, Entry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls every provider from `catalog` into the pending set.
    pub fn discover(
        &mut self,
        catalog: &mut dyn ProviderCatalog,
    ) -> Result<Vec<ProviderDescriptor>> {
        let mut descriptors = Vec::new();
        for provider in catalog.discover()? {
            let descriptor = ProviderDescriptor {
                id: provider.id().to_string(),
                dependencies: provider.dependencies(),
                operations: provider.operations(),
            };
            if self.register(provider) {
                descriptors.push(descriptor);
            }
        }
        debug!("discovered {} providers", descriptors.len());
        Ok(descriptors)
    }

    /// Registers a provider as pending. The first registration of an id wins.
    pub fn register(&mut self, provider: Box<dyn CapabilityProvider>) -> bool {
        let id = provider.id().to_string();
        if self.entries.contains_key(&id) {
            warn!("provider '{}' already registered; ignoring duplicate", id);
            return false;
        }
        let dependencies = provider.dependencies();
        self.entries.insert(
            id,
            Entry {
                provider,
                dependencies,
                status: ProviderStatus::Pending,
            },
        );
        true
    }

    /// Initializes every pending provider whose dependencies can be satisfied.
    ///
    /// Providers on a dependency cycle are failed first, over the whole pending
    /// graph, so their reason does not depend on declaration order. Repeated
    /// sweeps then run until one makes no progress; dependents of failed
    /// providers fail with the root cause attached.
    #[instrument(skip_all)]
    pub fn initialize_all(
        &mut self,
        config: &StepwiseConfig,
        secrets: &dyn SecretStore,
    ) -> RegistryState {
        for (id, cycle) in self.find_cycles(&self.pending_ids()) {
            self.fail(&id, FailureReason::CyclicDependency { cycle });
        }

        self.sweep_until_stalled(config, secrets);
        for id in self.pending_ids() {
            let dependency = self.first_unready_dependency(&id).unwrap_or_default();
            self.fail(&id, FailureReason::UnresolvedDependency { dependency });
        }

        let state = self.state();
        info!(
            "providers initialized: {} ready, {} failed",
            state.ready.len(),
            state.failed.len()
        );
        state
    }

    fn sweep_until_stalled(&mut self, config: &StepwiseConfig, secrets: &dyn SecretStore) {
        let mut sweeps = 0;
        loop {
            sweeps += 1;
            let mut progress = false;
            for id in self.pending_ids() {
                progress |= self.advance(&id, config, secrets);
            }
            if !progress {
                debug!("sweep {} made no progress", sweeps);
                return;
            }
        }
    }

    /// Moves one pending provider forward if its dependencies allow it.
    fn advance(&mut self, id: &str, config: &StepwiseConfig, secrets: &dyn SecretStore) -> bool {
        let dependencies = self.entries[id].dependencies.clone();

        for dependency in &dependencies {
            match self.entries.get(dependency).map(|entry| &entry.status) {
                None => {
                    self.fail(
                        id,
                        FailureReason::UnresolvedDependency {
                            dependency: dependency.clone(),
                        },
                    );
                    return true;
                }
                Some(ProviderStatus::Failed(reason)) => {
                    let reason = FailureReason::DependencyFailed {
                        dependency: dependency.clone(),
                        cause: Box::new(reason.clone()),
                    };
                    self.fail(id, reason);
                    return true;
                }
                Some(ProviderStatus::Pending) => return false,
                Some(ProviderStatus::Ready) => {}
            }
        }

        let settings = config.provider_settings(id);
        let entry = &mut self.entries[id];
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            entry.provider.initialize(&settings, secrets)
        }));
        match outcome {
            Ok(Ok(())) => {
                info!("provider '{}' ready", id);
                entry.status = ProviderStatus::Ready;
            }
            Ok(Err(e)) => self.fail(id, FailureReason::InitFailed(format!("{e:#}"))),
            Err(panic) => self.fail(id, FailureReason::InitFailed(panic_message(panic.as_ref()))),
        }
        true
    }

    fn fail(&mut self, id: &str, reason: FailureReason) {
        error!("{}", reason.chain(id));
        if let Some(entry) = self.entries.get_mut(id) {
            entry.status = ProviderStatus::Failed(reason);
        }
    }

    fn pending_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.status == ProviderStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn first_unready_dependency(&self, id: &str) -> Option<String> {
        self.entries[id]
            .dependencies
            .iter()
            .find(|dependency| {
                let status = self.entries.get(*dependency).map(|entry| &entry.status);
                status != Some(&ProviderStatus::Ready)
            })
            .cloned()
    }

    /// For every stalled provider that lies on a cycle, the cycle starting at it.
    fn find_cycles(&self, stalled: &[String]) -> Vec<(String, Vec<String>)> {
        let pending = stalled.iter().map(String::as_str).collect::<HashSet<_>>();
        stalled
            .iter()
            .filter_map(|id| {
                let mut path = vec![id.clone()];
                let mut visited = HashSet::new();
                self.cycle_back_to(id, id, &pending, &mut path, &mut visited)
                    .then(|| (id.clone(), path))
            })
            .collect()
    }

    fn cycle_back_to(
        &self,
        start: &str,
        node: &str,
        pending: &HashSet<&str>,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> bool {
        for dependency in &self.entries[node].dependencies {
            if dependency == start {
                path.push(dependency.clone());
                return true;
            }
            if !pending.contains(dependency.as_str()) || !visited.insert(dependency.clone()) {
                continue;
            }
            path.push(dependency.clone());
            if self.cycle_back_to(start, dependency, pending, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }

    pub fn state(&self) -> RegistryState {
        let mut state = RegistryState::default();
        for (id, entry) in &self.entries {
            match &entry.status {
                ProviderStatus::Pending => state.pending.push(id.clone()),
                ProviderStatus::Ready => state.ready.push(id.clone()),
                ProviderStatus::Failed(reason) => {
                    state.failed.insert(id.clone(), reason.clone());
                }
            }
        }
        state
    }

    pub fn status(&self, id: &str) -> Option<&ProviderStatus> {
        self.entries.get(id).map(|entry| &entry.status)
    }

    /// A provider that is ready to serve operations.
    pub fn get_provider(&self, id: &str) -> Option<&dyn CapabilityProvider> {
        self.entries
            .get(id)
            .filter(|entry| entry.status == ProviderStatus::Ready)
            .map(|entry| entry.provider.as_ref())
    }

    pub fn descriptor(&self, id: &str) -> Option<ProviderDescriptor> {
        self.entries.get(id).map(|entry| ProviderDescriptor {
            id: id.to_string(),
            dependencies: entry.dependencies.clone(),
            operations: entry.provider.operations(),
        })
    }

    pub fn list_ready(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.status == ProviderStatus::Ready)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn list_failed(&self) -> IndexMap<String, FailureReason> {
        self.state().failed
    }

    /// One slot per registered provider; `None` unless the provider is ready.
    pub fn client_handles(&self) -> Vec<(String, Option<ClientHandle>)> {
        self.entries
            .iter()
            .map(|(id, entry)| {
                let handle = match entry.status {
                    ProviderStatus::Ready => entry.provider.client(),
                    _ => None,
                };
                (id.clone(), handle)
            })
            .collect()
    }

    /// Workflow documents of ready providers, as a provider-tier source.
    pub fn provider_workflows(&self) -> InMemorySource {
        let mut source = InMemorySource::new(Tier::Provider);
        for id in self.list_ready() {
            for doc in self.entries[id].provider.workflows() {
                if source.get(&doc.name).is_some() {
                    warn!("provider '{}' redefines workflow '{}'; ignored", id, doc.name);
                    continue;
                }
                source.insert(doc);
            }
        }
        source
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic".to_string()
    }
}
