use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, instrument, warn};

use stepwise_core::constants::SECRET_ENV_PREFIX;
use stepwise_core::workflow::document::load_directory;
use stepwise_core::{
    CapabilityRegistry, EnvSecretStore, ProviderStatus, SecretStore, StepwiseConfig, Tier,
    WorkflowResolver,
};

use crate::discovery;

/// Everything a subcommand needs: config, initialized providers and the
/// tiered workflow resolver.
#[derive(Debug)]
pub struct Session {
    pub config: StepwiseConfig,
    pub registry: CapabilityRegistry,
    pub resolver: WorkflowResolver,
    pub secrets: Arc<dyn SecretStore>,
}

impl Session {
    #[instrument]
    pub fn open(config_path: &str) -> Result<Self> {
        let config = StepwiseConfig::load_or_default(config_path)
            .with_context(|| format!("unable to load config '{config_path}'"))?;
        Self::from_config(config, Arc::new(EnvSecretStore::new(SECRET_ENV_PREFIX)))
    }

    pub fn from_config(config: StepwiseConfig, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let mut catalog = discovery::provider_catalog(&config);
        let mut registry = CapabilityRegistry::new();
        registry.discover(&mut catalog)?;

        let state = registry.initialize_all(&config, secrets.as_ref());
        for (id, reason) in &state.failed {
            warn!("{}", reason.chain(id));
        }

        let mut resolver = WorkflowResolver::new();
        for tier in Tier::ALL {
            let Some(dir) = config.workflows.dir_for(tier) else {
                continue;
            };
            debug!("loading {} workflows from {}", tier, dir.display());
            let source = load_directory(tier, &dir)?;
            resolver.add_source(Box::new(source));
        }
        resolver.add_source(Box::new(registry.provider_workflows()));

        Ok(Self {
            config,
            registry,
            resolver,
            secrets,
        })
    }

    /// Fails when a provider marked `required = true` did not become ready.
    pub fn ensure_required_ready(&self) -> Result<()> {
        for id in self.config.required_providers() {
            match self.registry.status(id) {
                Some(ProviderStatus::Ready) => {}
                Some(ProviderStatus::Failed(reason)) => {
                    bail!("required provider is not ready: {}", reason.chain(id))
                }
                Some(ProviderStatus::Pending) | None => {
                    bail!("required provider '{}' was never discovered", id)
                }
            }
        }
        Ok(())
    }
}
