//! Layered configuration
//!
//! Four layers, merged in order of increasing precedence:
//! 1. Built-in defaults
//! 2. User config (`<config dir>/ij-devkit/config.toml`)
//! 3. Project config (`.ij-devkit.toml`)
//! 4. CLI overrides

mod build_config;
mod defaults;
mod effective;
mod merge;

use std::path::Path;

use serde_json::Value;

pub use build_config::{
    user_config_path, BuildConfig, CacheConfig, CatalogConfig, CatalogMode, FetchConfig,
    LockModeConfig, OverrideConfig, PlatformConfig, PluginEntry, PluginTable, RepositoryConfig,
    RuntimeConfig, SandboxConfig, SelfUpdateConfig, VerifyConfig, APP_DIR, PROJECT_CONFIG_FILE,
};
pub use defaults::BuiltinDefaults;
pub use effective::{toml_to_json, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};

/// Load all layers for a project and deserialize them.
///
/// Relative paths in the result are resolved against `project_dir`.
pub fn load(
    project_dir: &Path,
    user_config: Option<&Path>,
    cli_overrides: Option<Value>,
) -> Result<(EffectiveConfig, BuildConfig), ConfigError> {
    let default_user = user_config_path();
    let user = user_config.or(default_user.as_deref());
    let project = project_dir.join(PROJECT_CONFIG_FILE);

    let effective = EffectiveConfig::build(user, Some(&project), cli_overrides)?;
    let config = effective.build_config()?.resolve_paths(project_dir);
    Ok((effective, config))
}
