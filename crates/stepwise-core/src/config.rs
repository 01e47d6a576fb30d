use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::constants::PROJECT_WORKFLOW_DIR;
use crate::workflow::Tier;

/// Free-form provider settings handed to `CapabilityProvider::initialize`.
pub type ProviderSettings = toml::Table;

#[derive(Debug, Default, Deserialize)]
pub struct StepwiseConfig {
    #[serde(default)]
    pub workflows: WorkflowDirsConfig,
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
}

impl StepwiseConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        let cfg = toml::from_str::<Self>(&text)
            .with_context(|| format!("failed to parse TOML config: {path}"))?;
        Ok(cfg)
    }

    /// Like [`Self::load_from_file`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Settings for provider `id`; empty when the provider is not configured.
    pub fn provider_settings(&self, id: &str) -> ProviderSettings {
        self.providers
            .get(id)
            .map(|provider| provider.settings.clone())
            .unwrap_or_default()
    }

    /// Ids of providers marked `required = true`.
    pub fn required_providers(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|(_, provider)| provider.required)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkflowDirsConfig {
    pub project: Option<PathBuf>,
    pub user: Option<PathBuf>,
    pub system: Option<PathBuf>,
}

impl WorkflowDirsConfig {
    /// Directory backing `tier`, with a leading `~/` expanded from `HOME`.
    ///
    /// The project tier falls back to `.stepwise/workflows`. The provider tier
    /// is never directory backed.
    pub fn dir_for(&self, tier: Tier) -> Option<PathBuf> {
        let configured = match tier {
            Tier::Project => Some(
                self.project
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(PROJECT_WORKFLOW_DIR)),
            ),
            Tier::User => self.user.clone(),
            Tier::System => self.system.clone(),
            Tier::Provider => None,
        };
        configured.map(expand_home)
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path;
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub source: ProviderSource,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub settings: ProviderSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSource {
    #[default]
    Builtin,
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> StepwiseConfig {
        toml::from_str(
            r#"
            [workflows]
            project = "flows"
            system = "/etc/stepwise/workflows"

            [providers.deploy]
            source = "path"
            path = "bin/stepwise-provider-deploy"
            required = true
            region = "eu-west-1"

            [providers.std]
            "#,
        )
        .expect("fixture config should parse")
    }

    #[test]
    fn splits_provider_settings_from_wiring() {
        let cfg = fixture();
        let deploy = &cfg.providers["deploy"];
        assert_eq!(deploy.source, ProviderSource::Path);
        assert_eq!(deploy.path.as_deref(), Some(Path::new("bin/stepwise-provider-deploy")));
        assert_eq!(
            cfg.provider_settings("deploy").get("region").and_then(|v| v.as_str()),
            Some("eu-west-1")
        );
        assert!(!cfg.provider_settings("deploy").contains_key("source"));
        assert_eq!(cfg.providers["std"].source, ProviderSource::Builtin);
        assert_eq!(cfg.required_providers(), vec!["deploy"]);
    }

    #[test]
    fn tier_directories_default_for_project_only() {
        let cfg = StepwiseConfig::default();
        assert_eq!(cfg.workflows.dir_for(Tier::Project), Some(PathBuf::from(PROJECT_WORKFLOW_DIR)));
        assert_eq!(cfg.workflows.dir_for(Tier::User), None);
        assert_eq!(cfg.workflows.dir_for(Tier::Provider), None);

        let cfg = fixture();
        assert_eq!(cfg.workflows.dir_for(Tier::Project), Some(PathBuf::from("flows")));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepwise.toml");
        let cfg = StepwiseConfig::load_or_default(path.to_str().unwrap()).expect("defaults");
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepwise.toml");
        std::fs::write(&path, "providers = 1").unwrap();
        let err = StepwiseConfig::load_from_file(path.to_str().unwrap()).expect_err("must fail");
        assert!(err.to_string().contains("failed to parse TOML config"));
    }
}
