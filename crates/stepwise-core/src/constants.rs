//! Constants used across the Stepwise workspace.

/// The filename for Stepwise's primary configuration.
pub const CONFIG_FILE: &str = "stepwise.toml";

/// Default project-tier workflow directory, relative to the working directory.
pub const PROJECT_WORKFLOW_DIR: &str = ".stepwise/workflows";

/// Extension of workflow documents inside a tier directory.
pub const WORKFLOW_FILE_EXTENSION: &str = "toml";

/// Prefix of external provider binaries probed on `PATH`.
pub const PROVIDER_BINARY_PREFIX: &str = "stepwise-provider-";

/// Prefix of environment variables exposed through the default secret store.
pub const SECRET_ENV_PREFIX: &str = "STEPWISE_SECRET_";
