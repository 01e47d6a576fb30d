use tracing::{debug, warn};

use stepwise_core::constants::PROVIDER_BINARY_PREFIX;
use stepwise_core::registry::subprocess::SubprocessProvider;
use stepwise_core::{ProviderSource, StaticCatalog, StepwiseConfig};
use stepwise_ext_std::StdProvider;

/// Ids of the providers compiled into the binary.
pub fn builtin_ids() -> &'static [&'static str] {
    &[stepwise_ext_std::PROVIDER_ID]
}

/// Builds the catalog of every provider this installation can offer:
/// the builtins plus each `source = "path"` provider that answers `--discover`.
pub fn provider_catalog(cfg: &StepwiseConfig) -> StaticCatalog {
    let mut catalog = StaticCatalog::default().with(StdProvider::new());

    for (id, provider) in &cfg.providers {
        match provider.source {
            ProviderSource::Builtin => {
                if !builtin_ids().contains(&id.as_str()) {
                    warn!("provider '{}' is configured as builtin but no such builtin exists", id);
                }
            }
            ProviderSource::Path => {
                let binary = match &provider.path {
                    Some(path) => path.to_string_lossy().to_string(),
                    None => format!("{PROVIDER_BINARY_PREFIX}{id}"),
                };
                debug!("probing subprocess provider '{}' at {}", id, binary);
                match SubprocessProvider::probe(id, &binary) {
                    Ok(found) => catalog.push(Box::new(found)),
                    Err(e) => warn!("provider '{}' unavailable: {:#}", id, e),
                }
            }
        }
    }

    catalog
}
