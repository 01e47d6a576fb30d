use std::collections::HashMap;
use std::fmt::Debug;

/// Read-only access to secrets for provider initialization and steps.
///
/// Storage backends live outside this crate; the engine only reads.
pub trait SecretStore: Debug + Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Secrets read from environment variables, `<prefix><KEY>` upper-cased.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_ascii_uppercase().replace(['-', '.'], "_"))
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.variable_name(key)).ok()
    }
}

/// Fixed secrets, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SecretStore for StaticSecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
