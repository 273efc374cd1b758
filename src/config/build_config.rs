//! Typed build configuration
//!
//! The merged configuration document deserialized into structs. Unknown
//! keys are rejected at every level.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ij_cache::{FetchOptions, LockMode, LockOptions, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Directory name used under the platform cache and config directories
pub const APP_DIR: &str = "ij-devkit";

/// Complete build configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub platform: PlatformConfig,
    pub runtime: RuntimeConfig,
    /// Plugin dependency declarations, in declaration order
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
    /// Named custom plugin repositories
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    pub catalog: CatalogConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub sandbox: SandboxConfig,
    pub self_update: SelfUpdateConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    /// Platform type code or name (`IC`, `IU`, `PyCharmCommunity`, ...)
    #[serde(rename = "type")]
    pub platform_type: String,
    /// Concrete version or alias (`latest`, `latest-eap`)
    pub version: String,
    /// Also fetch the platform sources jar
    pub download_sources: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Fetch a JetBrains Runtime
    pub enabled: bool,
    /// JBR version, e.g. `17.0.6b829.9`
    #[serde(default)]
    pub version: Option<String>,
    /// Variant (`jcef`, `dcevm`, `fd`, or empty for plain `jbr`)
    pub variant: String,
    pub repository: String,
}

/// A plugin declaration: either string notation or a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginEntry {
    /// `id`, `id:version` or `id:version@channel`
    Notation(String),
    Table(PluginTable),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginTable {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    /// Name of an entry in `repositories`, or a base URL
    #[serde(default)]
    pub repository: Option<String>,
    /// Local plugin directory, jar or zip
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Shipped inside the platform distribution
    #[serde(default)]
    pub bundled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: String,
    pub url: String,
}

/// Source of alias resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogMode {
    /// Only the `platforms` / `plugins` tables below
    Static,
    /// JetBrains product-release service and marketplace metadata
    Jetbrains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    pub mode: CatalogMode,
    /// Platform code -> alias -> version, e.g. `[catalog.platforms.IC] latest = "221.6008.13"`
    #[serde(default)]
    pub platforms: BTreeMap<String, BTreeMap<String, String>>,
    /// Plugin id -> latest version
    #[serde(default)]
    pub plugins: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockModeConfig {
    Auto,
    Advisory,
    Marker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache root; defaults to the user cache directory
    #[serde(default)]
    pub root: Option<PathBuf>,
    pub lock_timeout_seconds: u64,
    pub stale_lock_seconds: u64,
    pub lock_mode: LockModeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    pub offline: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub parallelism: usize,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideConfig {
    /// File or directory copied into the sandbox
    pub source: PathBuf,
    /// Destination relative to the sandbox root
    pub target: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    pub dir: PathBuf,
    /// Keep the sandbox after the build instead of tearing it down
    pub keep: bool,
    #[serde(default)]
    pub overrides: Vec<OverrideConfig>,
    #[serde(default)]
    pub disabled_plugins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelfUpdateConfig {
    pub check: bool,
    pub feed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyConfig {
    /// Plugin under test: a plugin directory, jar, or `plugin.xml`
    #[serde(default)]
    pub plugin: Option<PathBuf>,
}

impl BuildConfig {
    /// Make every relative path absolute against `base` (the project directory).
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let absolute = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        absolute(&mut self.sandbox.dir);
        for entry in &mut self.sandbox.overrides {
            absolute(&mut entry.source);
        }
        for plugin in &mut self.plugins {
            if let PluginEntry::Table(PluginTable {
                path: Some(path), ..
            }) = plugin
            {
                absolute(path);
            }
        }
        if let Some(root) = &mut self.cache.root {
            absolute(root);
        }
        if let Some(plugin) = &mut self.verify.plugin {
            absolute(plugin);
        }
        self
    }

    /// Cache root, falling back to the user cache directory.
    pub fn cache_root(&self) -> PathBuf {
        match &self.cache.root {
            Some(root) => root.clone(),
            None => dirs::cache_dir()
                .map(|dir| dir.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from(".ij-devkit-cache")),
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_secs(self.cache.lock_timeout_seconds),
            stale_after: Duration::from_secs(self.cache.stale_lock_seconds),
            poll_interval: Duration::from_millis(50),
            mode: match self.cache.lock_mode {
                LockModeConfig::Auto => LockMode::default(),
                LockModeConfig::Advisory => LockMode::Advisory,
                LockModeConfig::Marker => LockMode::Marker,
            },
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            offline: self.fetch.offline,
            lock: self.lock_options(),
            retry: RetryPolicy {
                max_attempts: self.fetch.max_attempts,
                initial_backoff: Duration::from_millis(self.fetch.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.fetch.max_backoff_ms),
                multiplier: 2,
            },
            parallelism: self.fetch.parallelism,
        }
    }
}

/// User-level configuration file, `<config dir>/ij-devkit/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = ".ij-devkit.toml";
