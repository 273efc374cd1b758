//! The `prepare` pipeline
//!
//! initialize → resolve → fetch → compose → verify (optional)
//!
//! Each stage consumes the previous stage's output; the first error stops
//! the pipeline. The composed sandbox stays locked until the returned
//! [`PreparedSandbox`] is dropped or finished.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ij_cache::{CacheEntry, CacheStore, CancellationToken, Fetcher, Sleeper, Transport};
use tracing::{debug, info};

use crate::catalog::{self, ReleaseCatalog};
use crate::config::{BuildConfig, ConfigError};
use crate::dependency::PluginDependency;
use crate::descriptor::{scan_plugins, PluginDescriptor};
use crate::error::{Error, Result};
use crate::initialize::{initialize, UpdateStatus};
use crate::platform::HostPlatform;
use crate::resolver::{Resolution, ResolveError, Resolver};
use crate::sandbox::{ComposedSandbox, CompositionRequest, PluginSource, SandboxComposer};
use crate::verifier::{VerificationReport, Verifier};

/// Options for [`prepare`].
#[derive(Clone)]
pub struct PrepareOptions {
    /// Run the verifier after composition
    pub verify: bool,
    /// Plugin under test; falls back to `verify.plugin` in configuration
    pub plugin_under_test: Option<PathBuf>,
    pub host: HostPlatform,
    pub cancel: CancellationToken,
    /// Backoff sleeper for fetch retries; the thread sleeper when unset
    pub sleeper: Option<Arc<dyn Sleeper>>,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            verify: false,
            plugin_under_test: None,
            host: HostPlatform::current(),
            cancel: CancellationToken::new(),
            sleeper: None,
        }
    }
}

/// Output of a successful [`prepare`] run.
#[derive(Debug)]
pub struct PreparedSandbox {
    pub update: UpdateStatus,
    pub resolution: Resolution,
    /// Cache entries in coordinate order
    pub entries: Vec<CacheEntry>,
    pub sandbox: ComposedSandbox,
    pub runtime_path: Option<PathBuf>,
    pub sources_path: Option<PathBuf>,
    pub report: Option<VerificationReport>,
}

/// Build a fetcher for `config`.
pub fn fetcher(
    config: &BuildConfig,
    transport: Arc<dyn Transport>,
    cancel: &CancellationToken,
    sleeper: Option<Arc<dyn Sleeper>>,
) -> Fetcher {
    let fetcher = Fetcher::new(
        CacheStore::new(config.cache_root()),
        transport,
        config.fetch_options(),
    )
    .with_cancellation(cancel.clone());
    match sleeper {
        Some(sleeper) => fetcher.with_sleeper(sleeper),
        None => fetcher,
    }
}

/// Resolve, fetch and compose a sandbox; optionally verify the plugin under test.
pub fn prepare(
    config: &BuildConfig,
    transport: Arc<dyn Transport>,
    catalog: &dyn ReleaseCatalog,
    options: &PrepareOptions,
) -> Result<PreparedSandbox> {
    let update = initialize(config, transport.as_ref());
    check_cancelled(&options.cancel)?;

    let resolution = Resolver::new(catalog, options.host.clone()).resolve(config)?;
    check_cancelled(&options.cancel)?;

    let coordinates = resolution.coordinates();
    info!(artifacts = coordinates.len(), "fetching artifacts");
    let entries = fetcher(config, transport, &options.cancel, options.sleeper.clone())
        .try_fetch_all(&coordinates)?;

    let mut paths = entries.iter().map(|e| e.content_path.clone());
    let platform_dir = paths.next().ok_or_else(|| Error::Io {
        path: config.cache_root(),
        source: io::Error::new(io::ErrorKind::NotFound, "platform entry missing from fetch results"),
    })?;

    let bundled = bundled_ids(&platform_dir)?;
    let mut plugins = Vec::new();
    for plugin in &resolution.plugins {
        let label = plugin.dependency.to_string();
        match &plugin.dependency {
            PluginDependency::Bundled { id } => {
                if !bundled.contains(id) {
                    return Err(ResolveError::MissingBundled {
                        id: id.clone(),
                        platform: resolution.platform.version.clone(),
                    }
                    .into());
                }
                debug!(plugin = %id, "bundled plugin present");
            }
            PluginDependency::Local { path, .. } => plugins.push(PluginSource::local(label, path)),
            PluginDependency::Marketplace { .. } | PluginDependency::CustomRepository { .. } => {
                if let Some(path) = paths.next() {
                    plugins.push(PluginSource::cached(label, path));
                }
            }
        }
    }
    let runtime_path = resolution.runtime.as_ref().and_then(|_| paths.next());
    let sources_path = resolution.sources.as_ref().and_then(|_| paths.next());

    let request = CompositionRequest {
        sandbox_dir: config.sandbox.dir.clone(),
        platform_dir,
        plugins,
        overrides: config.sandbox.overrides.clone(),
        disabled_plugins: config.sandbox.disabled_plugins.clone(),
        keep: config.sandbox.keep,
    };
    let sandbox = SandboxComposer::new(config.lock_options(), options.cancel.clone()).compose(&request)?;

    let report = if options.verify {
        let report = verify(config, &resolution, &sandbox, options)?;
        report.clone().into_result()?;
        Some(report)
    } else {
        None
    };

    Ok(PreparedSandbox {
        update,
        resolution,
        entries,
        sandbox,
        runtime_path,
        sources_path,
        report,
    })
}

fn verify(
    config: &BuildConfig,
    resolution: &Resolution,
    sandbox: &ComposedSandbox,
    options: &PrepareOptions,
) -> Result<VerificationReport> {
    let path = options
        .plugin_under_test
        .clone()
        .or_else(|| config.verify.plugin.clone())
        .ok_or_else(|| {
            ConfigError::Validation(
                "verification requested but no plugin under test is configured (verify.plugin)"
                    .to_string(),
            )
        })?;

    let mut manifest = PluginDescriptor::read(&path)?;
    for dependency in &mut manifest.dependencies {
        let pinned = resolution
            .plugins
            .iter()
            .find(|p| p.dependency.id() == dependency.id)
            .and_then(|p| p.dependency.pinned_version())
            .filter(|v| !catalog::is_alias(v));
        if let Some(version) = pinned {
            dependency.version = Some(version.to_string());
        }
    }

    Ok(Verifier::new().verify(sandbox.layout(), &manifest))
}

/// Plugin ids and module aliases shipped with the platform.
fn bundled_ids(platform_dir: &Path) -> Result<BTreeSet<String>> {
    let mut ids = BTreeSet::new();
    for plugin in scan_plugins(&platform_dir.join("plugins"))? {
        if let Some(descriptor) = plugin.descriptor {
            ids.insert(descriptor.id);
            ids.extend(descriptor.modules);
        }
    }
    Ok(ids)
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
