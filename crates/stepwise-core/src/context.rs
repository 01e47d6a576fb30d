use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::registry::CapabilityRegistry;
use crate::result::Metadata;
use crate::secrets::{SecretStore, StaticSecrets};

/// Opaque client object a provider exposes to steps (an API client, a repo handle).
pub type ClientHandle = Arc<dyn Any + Send + Sync>;

/// The key/value store threaded through one run.
pub type SharedData = IndexMap<String, Value>;

/// Cooperative cancellation signal shared between a run and whoever may interrupt it.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Position of the executor within the current workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StepProgress {
    pub(crate) step_index: usize,
    pub(crate) total_steps: usize,
    pub(crate) workflow_name: String,
}

/// Everything a step can see during one run.
///
/// Steps communicate only through the shared data (`get`/`set`/`has`). The
/// step position fields are maintained by the executor and read-only here.
pub struct ExecutionContext {
    shared: SharedData,
    clients: IndexMap<String, Option<ClientHandle>>,
    secrets: Arc<dyn SecretStore>,
    cancellation: CancellationFlag,
    progress: StepProgress,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clients = self
            .clients
            .iter()
            .map(|(id, handle)| (id.as_str(), handle.is_some()))
            .collect::<Vec<_>>();
        f.debug_struct("ExecutionContext")
            .field("shared", &self.shared)
            .field("clients", &clients)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.shared.get(key)
    }

    /// String view of a value: strings as-is, other values as JSON.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.shared.get(key).map(value_to_text)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.shared.insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.shared.contains_key(key)
    }

    pub fn shared_data(&self) -> &SharedData {
        &self.shared
    }

    pub(crate) fn merge(&mut self, metadata: &Metadata) {
        for (key, value) in metadata {
            self.shared.insert(key.clone(), value.clone());
        }
    }

    /// Client handle of provider `id`; `None` if unknown or not ready.
    pub fn client(&self, id: &str) -> Option<&ClientHandle> {
        self.clients.get(id).and_then(Option::as_ref)
    }

    /// Typed client handle of provider `id`.
    pub fn client_as<T: Any + Send + Sync>(&self, id: &str) -> Option<Arc<T>> {
        self.client(id)
            .cloned()
            .and_then(|handle| handle.downcast::<T>().ok())
    }

    pub fn secrets(&self) -> &dyn SecretStore {
        self.secrets.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    /// 1-based index of the running step within the composed workflow.
    pub fn step_index(&self) -> usize {
        self.progress.step_index
    }

    pub fn total_steps(&self) -> usize {
        self.progress.total_steps
    }

    pub fn workflow_name(&self) -> &str {
        &self.progress.workflow_name
    }

    pub(crate) fn progress(&self) -> StepProgress {
        self.progress.clone()
    }

    pub(crate) fn set_progress(&mut self, progress: StepProgress) {
        self.progress = progress;
    }
}

pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Assembles an [`ExecutionContext`] from provider handles and core collaborators.
#[derive(Default)]
pub struct ExecutionContextBuilder {
    shared: SharedData,
    clients: IndexMap<String, Option<ClientHandle>>,
    secrets: Option<Arc<dyn SecretStore>>,
    cancellation: CancellationFlag,
}

impl ExecutionContextBuilder {
    /// Registers the client handle for provider `id`; `None` when it is not ready.
    pub fn with_client(mut self, id: impl Into<String>, handle: Option<ClientHandle>) -> Self {
        self.clients.insert(id.into(), handle);
        self
    }

    /// Registers a handle slot for every provider the registry knows.
    pub fn with_registry(mut self, registry: &CapabilityRegistry) -> Self {
        for (id, handle) in registry.client_handles() {
            self.clients.insert(id, handle);
        }
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Seeds the shared data before the first step runs.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.shared.insert(key.into(), value);
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            shared: self.shared,
            clients: self.clients,
            secrets: self
                .secrets
                .unwrap_or_else(|| Arc::new(StaticSecrets::default())),
            cancellation: self.cancellation,
            progress: StepProgress::default(),
        }
    }
}
