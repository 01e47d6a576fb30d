//! The builtin `std` provider: small general-purpose operations every
//! Stepwise installation can rely on.

use anyhow::{bail, Result};
use serde_json::{json, Value};
use stepwise_core::workflow::{PluginStep, RawWorkflowDoc};
use stepwise_core::{
    CapabilityProvider, ExecutionContext, Metadata, ProviderSettings, SecretStore, StepResult,
};
use tracing::debug;

pub const PROVIDER_ID: &str = "std";

pub fn default_operations() -> &'static [&'static str] {
    &["echo", "set", "fail", "skip", "abort", "check_secret"]
}

#[derive(Debug, Default)]
pub struct StdProvider {
    prefix: Option<String>,
}

impl StdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn text(&self, ctx: &ExecutionContext, key: &str) -> String {
        let text = ctx.get_str(key).unwrap_or_default();
        match &self.prefix {
            Some(prefix) => format!("{prefix}{text}"),
            None => text,
        }
    }
}

impl CapabilityProvider for StdProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn operations(&self) -> Vec<String> {
        default_operations().iter().map(|op| op.to_string()).collect()
    }

    fn initialize(
        &mut self,
        settings: &ProviderSettings,
        _secrets: &dyn SecretStore,
    ) -> Result<()> {
        self.prefix = match settings.get("prefix") {
            None => None,
            Some(value) => match value.as_str() {
                Some(prefix) => Some(prefix.to_string()),
                None => bail!("setting 'prefix' must be a string"),
            },
        };
        Ok(())
    }

    fn call(&self, operation: &str, ctx: &mut ExecutionContext) -> Result<StepResult> {
        debug!("std.{} at step {}", operation, ctx.step_index());
        match operation {
            // message -> printed and returned
            "echo" => {
                let message = self.text(ctx, "message");
                println!("{message}");
                Ok(StepResult::success(message))
            }
            // key, value -> shared[key] = value
            "set" => {
                let Some(key) = ctx.get_str("key") else {
                    bail!("std.set needs a 'key' input");
                };
                let value = ctx.get("value").cloned().unwrap_or(Value::Null);
                let mut metadata = Metadata::new();
                metadata.insert(key.clone(), value);
                Ok(StepResult::success_with(format!("set {key}"), metadata))
            }
            "fail" => {
                let message = ctx
                    .get_str("message")
                    .unwrap_or_else(|| "failed on request".to_string());
                Ok(match ctx.get("code").and_then(Value::as_i64) {
                    Some(code) => StepResult::error_with_code(message, code as i32),
                    None => StepResult::error(message),
                })
            }
            "skip" => Ok(StepResult::skip(self.text(ctx, "message"))),
            "abort" => Ok(StepResult::abort(self.text(ctx, "message"))),
            // secret -> Success when the store has it; the value never enters shared data
            "check_secret" => {
                let Some(name) = ctx.get_str("secret") else {
                    bail!("std.check_secret needs a 'secret' input");
                };
                if ctx.secrets().has(&name) {
                    let mut metadata = Metadata::new();
                    metadata.insert(format!("{name}_present"), json!(true));
                    Ok(StepResult::success_with(format!("secret '{name}' is set"), metadata))
                } else {
                    Ok(StepResult::error(format!("secret '{name}' is not set")))
                }
            }
            other => bail!("std has no operation '{other}'"),
        }
    }

    fn workflows(&self) -> Vec<RawWorkflowDoc> {
        let announce = PluginStep::new(PROVIDER_ID, "echo")
            .id("announce")
            .param("message", json!("${message}"));
        vec![RawWorkflowDoc {
            description: "Print a message; extend it through the 'before' hook".to_string(),
            ..RawWorkflowDoc::new("notify")
        }
        .with_hook_marker("before")
        .with_step(announce.into())
        .with_param("message", json!("hello from stepwise"))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::{StaticSecrets, StepwiseConfig};
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext::builder()
            .with_secrets(Arc::new(StaticSecrets::default().with("deploy_token", "t0k3n")))
            .build()
    }

    #[test]
    fn echo_applies_prefix_setting() {
        let mut provider = StdProvider::new();
        let mut settings = ProviderSettings::new();
        settings.insert("prefix".to_string(), "[ci] ".into());
        provider
            .initialize(&settings, &StaticSecrets::default())
            .unwrap();

        let mut ctx = ctx();
        ctx.set("message", json!("hi"));
        let result = provider.call("echo", &mut ctx).unwrap();
        assert_eq!(result.message(), "[ci] hi");
    }

    #[test]
    fn rejects_non_string_prefix() {
        let mut provider = StdProvider::new();
        let mut settings = ProviderSettings::new();
        settings.insert("prefix".to_string(), 3i64.into());
        assert!(provider
            .initialize(&settings, &StaticSecrets::default())
            .is_err());
    }

    #[test]
    fn set_returns_metadata() {
        let provider = StdProvider::new();
        let mut ctx = ctx();
        ctx.set("key", json!("version"));
        ctx.set("value", json!("1.2.0"));
        let result = provider.call("set", &mut ctx).unwrap();
        assert_eq!(result.metadata().unwrap()["version"], json!("1.2.0"));
    }

    #[test]
    fn fail_carries_code() {
        let provider = StdProvider::new();
        let mut ctx = ctx();
        ctx.set("code", json!(7));
        match provider.call("fail", &mut ctx).unwrap() {
            StepResult::Error { error_code, message, .. } => {
                assert_eq!(error_code, Some(7));
                assert_eq!(message, "failed on request");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn check_secret_never_exposes_value() {
        let provider = StdProvider::new();
        let mut ctx = ctx();
        ctx.set("secret", json!("deploy_token"));
        let result = provider.call("check_secret", &mut ctx).unwrap();
        assert_eq!(result.metadata().unwrap()["deploy_token_present"], json!(true));
        assert!(!result.message().contains("t0k3n"));

        ctx.set("secret", json!("missing"));
        assert!(provider.call("check_secret", &mut ctx).unwrap().is_error());
    }

    #[test]
    fn notify_workflow_is_contributed_once_ready() {
        let mut catalog = stepwise_core::StaticCatalog::default().with(StdProvider::new());
        let mut registry = stepwise_core::CapabilityRegistry::new();
        registry.discover(&mut catalog).unwrap();
        let state = registry.initialize_all(&StepwiseConfig::default(), &StaticSecrets::default());
        assert_eq!(state.ready, vec!["std"]);

        let source = registry.provider_workflows();
        let resolver = stepwise_core::WorkflowResolver::new().with_source(source);
        let composed = stepwise_core::WorkflowComposer::new(&resolver)
            .compose_ref(&stepwise_core::WorkflowRef::named("notify"))
            .unwrap();
        assert_eq!(composed.steps.len(), 1);
        assert_eq!(composed.steps[0].display_id(), "announce");
    }
}
