use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::context::ExecutionContext;
use crate::registry::CapabilityProvider;
use crate::result::StepResult;
use crate::secrets::SecretStore;

/// What an external provider binary reports for `--discover`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryInfo {
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A provider that delegates to an external binary via JSON over stdio.
///
/// `--discover` prints a [`DiscoveryInfo`]; `--invoke <operation>` reads the
/// operation name, the shared data and the provider settings as JSON on stdin
/// and prints a tagged `StepResult` on stdout.
#[derive(Debug)]
pub struct SubprocessProvider {
    id: String,
    binary_path: String,
    info: DiscoveryInfo,
    settings: ProviderSettings,
}

impl SubprocessProvider {
    pub fn new(id: String, binary_path: String, info: DiscoveryInfo) -> Self {
        Self {
            id,
            binary_path,
            info,
            settings: ProviderSettings::new(),
        }
    }

    /// Runs `binary --discover` and builds a provider from its answer.
    pub fn probe(id: &str, binary_path: &str) -> Result<Self> {
        let output = Command::new(binary_path)
            .arg("--discover")
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("failed to execute provider binary '{binary_path}'"))?;

        if !output.status.success() {
            bail!("{} --discover failed with status {}", binary_path, output.status);
        }

        let info = serde_json::from_slice::<DiscoveryInfo>(&output.stdout)
            .with_context(|| format!("failed to parse discovery output of '{binary_path}'"))?;
        debug!(
            "discovered subprocess provider '{}' with operations {:?}",
            id, info.operations
        );
        Ok(Self::new(id.to_string(), binary_path.to_string(), info))
    }
}

impl CapabilityProvider for SubprocessProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> Vec<String> {
        self.info.dependencies.clone()
    }

    fn operations(&self) -> Vec<String> {
        self.info.operations.clone()
    }

    fn initialize(
        &mut self,
        settings: &ProviderSettings,
        _secrets: &dyn SecretStore,
    ) -> Result<()> {
        self.settings = settings.clone();
        Ok(())
    }

    fn call(&self, operation: &str, ctx: &mut ExecutionContext) -> Result<StepResult> {
        let request = json!({
            "operation": operation,
            "workflow": ctx.workflow_name(),
            "step_index": ctx.step_index(),
            "shared": ctx.shared_data(),
            "settings": self.settings,
        });
        let payload = serde_json::to_vec(&request).context("failed to serialize provider request")?;

        let mut child = Command::new(&self.binary_path)
            .arg("--invoke")
            .arg(operation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn provider binary '{}'", self.binary_path))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .context("failed to write to provider stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("failed to read from provider stdout")?;

        if !output.status.success() {
            bail!(
                "provider '{}' exited with status {} for {}",
                self.id,
                output.status,
                operation
            );
        }

        serde_json::from_slice::<StepResult>(&output.stdout)
            .with_context(|| format!("failed to parse StepResult from provider '{}'", self.id))
    }
}
