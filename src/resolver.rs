//! Coordinate resolution
//!
//! Turns the declared platform, plugins and runtime into an ordered list of
//! artifact coordinates: platform first, then plugins in declaration order,
//! then the runtime, then platform sources.

use ij_cache::{ArchiveFormat, ArtifactCoordinate, ArtifactKind};
use ij_version::{ParseError, Version};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{self, CatalogError, ReleaseCatalog};
use crate::config::BuildConfig;
use crate::dependency::{DeclarationError, PluginDependency};
use crate::platform::{HostPlatform, PlatformType, UnknownPlatformType};

/// IntelliJ Maven repository root (without `releases` / `snapshots`)
pub const INTELLIJ_REPOSITORY: &str = "https://www.jetbrains.com/intellij-repository";

/// Android Studio distribution host
pub const ANDROID_STUDIO_REPOSITORY: &str =
    "https://redirector.gvt1.com/edgedl/android/studio/ide-zips";

/// Snapshot that always names the newest EAP build
pub const LATEST_EAP_SNAPSHOT: &str = "LATEST-EAP-SNAPSHOT";

/// Resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    UnknownPlatform(#[from] UnknownPlatformType),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error("invalid {context}: {source}")]
    Version {
        context: String,
        #[source]
        source: ParseError,
    },

    #[error("cannot resolve '{alias}' for {target}: {source}")]
    Alias {
        alias: String,
        target: String,
        #[source]
        source: CatalogError,
    },

    #[error("invalid runtime version '{version}': {reason}")]
    Runtime { version: String, reason: String },

    #[error("bundled plugin '{id}' is not part of platform {platform}")]
    MissingBundled { id: String, platform: String },
}

/// The resolved base platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPlatform {
    pub platform_type: PlatformType,
    /// Concrete version (aliases already resolved)
    pub version: String,
    pub coordinate: ArtifactCoordinate,
}

/// A resolved plugin declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPlugin {
    pub dependency: PluginDependency,
    /// Concrete version for fetched plugins
    pub version: Option<String>,
    /// `None` for bundled and local plugins
    pub coordinate: Option<ArtifactCoordinate>,
}

/// Everything a build needs, in fetch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub platform: ResolvedPlatform,
    pub plugins: Vec<ResolvedPlugin>,
    pub runtime: Option<ArtifactCoordinate>,
    pub sources: Option<ArtifactCoordinate>,
}

impl Resolution {
    /// Coordinates to fetch: platform, plugins, runtime, sources.
    pub fn coordinates(&self) -> Vec<ArtifactCoordinate> {
        std::iter::once(&self.platform.coordinate)
            .chain(self.plugins.iter().filter_map(|p| p.coordinate.as_ref()))
            .chain(self.runtime.iter())
            .chain(self.sources.iter())
            .cloned()
            .collect()
    }
}

/// Computes coordinates from configuration.
pub struct Resolver<'a> {
    catalog: &'a dyn ReleaseCatalog,
    host: HostPlatform,
    intellij_repository: String,
    marketplace_repository: String,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a dyn ReleaseCatalog, host: HostPlatform) -> Self {
        Self {
            catalog,
            host,
            intellij_repository: INTELLIJ_REPOSITORY.to_string(),
            marketplace_repository: catalog::MARKETPLACE_MAVEN_URL.to_string(),
        }
    }

    /// Use mirrors instead of the public repositories.
    pub fn with_repositories(mut self, intellij: &str, marketplace: &str) -> Self {
        self.intellij_repository = intellij.trim_end_matches('/').to_string();
        self.marketplace_repository = marketplace.trim_end_matches('/').to_string();
        self
    }

    pub fn resolve(&self, config: &BuildConfig) -> Result<Resolution, ResolveError> {
        let platform_type: PlatformType = config.platform.platform_type.parse()?;
        let version = self.platform_version(platform_type, &config.platform.version)?;
        info!(platform = %platform_type, %version, "platform resolved");

        let platform = ResolvedPlatform {
            platform_type,
            coordinate: self.platform_coordinate(platform_type, &version),
            version,
        };

        let mut plugins = Vec::with_capacity(config.plugins.len());
        for entry in &config.plugins {
            let dependency = PluginDependency::from_entry(entry, &config.repositories)?;
            plugins.push(self.resolve_plugin(dependency)?);
        }

        let runtime = if config.runtime.enabled {
            let version = config.runtime.version.as_deref().ok_or_else(|| ResolveError::Runtime {
                version: String::new(),
                reason: "runtime.enabled requires runtime.version".to_string(),
            })?;
            Some(self.runtime_coordinate(version, &config.runtime.variant, &config.runtime.repository)?)
        } else {
            None
        };

        let sources = if config.platform.download_sources {
            if platform_type.publishes_sources() {
                Some(self.sources_coordinate(&platform.version))
            } else {
                warn!(platform = %platform_type, "no sources are published for this platform type");
                None
            }
        } else {
            None
        };

        Ok(Resolution {
            platform,
            plugins,
            runtime,
            sources,
        })
    }

    fn platform_version(&self, platform: PlatformType, requested: &str) -> Result<String, ResolveError> {
        let requested = requested.trim();
        if catalog::is_alias(requested) {
            let resolved = self
                .catalog
                .resolve_platform(platform, requested)
                .map_err(|source| ResolveError::Alias {
                    alias: requested.to_string(),
                    target: format!("platform {}", platform),
                    source,
                })?;
            debug!(alias = requested, %resolved, "platform alias resolved");
            return self.platform_version(platform, &resolved);
        }

        if requested.eq_ignore_ascii_case(LATEST_EAP_SNAPSHOT) {
            return Ok(LATEST_EAP_SNAPSHOT.to_string());
        }

        Version::parse(requested).map_err(|source| ResolveError::Version {
            context: format!("platform version for {}", platform),
            source,
        })?;
        Ok(requested.to_string())
    }

    fn resolve_plugin(&self, dependency: PluginDependency) -> Result<ResolvedPlugin, ResolveError> {
        let (version, coordinate) = match &dependency {
            PluginDependency::Bundled { .. } | PluginDependency::Local { .. } => (None, None),
            PluginDependency::Marketplace {
                id,
                version,
                channel,
            } => {
                let version = self.plugin_version(id, version.as_deref(), channel.as_deref())?;
                let coordinate = plugin_coordinate(
                    &self.marketplace_repository,
                    id,
                    &version,
                    channel.as_deref(),
                );
                (Some(version), Some(coordinate))
            }
            PluginDependency::CustomRepository {
                id,
                version,
                repository,
            } => {
                let coordinate = plugin_coordinate(repository, id, version, None);
                (Some(version.clone()), Some(coordinate))
            }
        };

        debug!(plugin = %dependency, ?version, "plugin resolved");
        Ok(ResolvedPlugin {
            dependency,
            version,
            coordinate,
        })
    }

    fn plugin_version(
        &self,
        id: &str,
        version: Option<&str>,
        channel: Option<&str>,
    ) -> Result<String, ResolveError> {
        match version {
            Some(v) if !catalog::is_alias(v) => Ok(v.to_string()),
            requested => self
                .catalog
                .latest_plugin_version(id, channel)
                .map_err(|source| ResolveError::Alias {
                    alias: requested.unwrap_or(catalog::LATEST).to_string(),
                    target: format!("plugin {}", id),
                    source,
                }),
        }
    }

    /// Coordinate of a platform distribution.
    pub fn platform_coordinate(&self, platform: PlatformType, version: &str) -> ArtifactCoordinate {
        match platform.maven_artifact() {
            Some((group, artifact)) => ArtifactCoordinate {
                kind: ArtifactKind::Platform,
                identifier: artifact.to_string(),
                version: version.to_string(),
                channel: None,
                repository: self.maven_repository(version),
                path: format!("{group}/{artifact}/{version}/{artifact}-{version}.zip"),
                format: ArchiveFormat::Zip,
                integrity: None,
            },
            None => {
                let (suffix, format) = match self.host.os.as_str() {
                    "osx" => ("mac.zip", ArchiveFormat::Zip),
                    "windows" => ("windows.zip", ArchiveFormat::Zip),
                    _ => ("linux.tar.gz", ArchiveFormat::TarGz),
                };
                ArtifactCoordinate {
                    kind: ArtifactKind::Platform,
                    identifier: "android-studio".to_string(),
                    version: version.to_string(),
                    channel: None,
                    repository: ANDROID_STUDIO_REPOSITORY.to_string(),
                    path: format!("{version}/android-studio-{version}-{suffix}"),
                    format,
                    integrity: None,
                }
            }
        }
    }

    /// IU builds share the ideaIC sources jar.
    fn sources_coordinate(&self, version: &str) -> ArtifactCoordinate {
        let (group, artifact) = ("com/jetbrains/intellij/idea", "ideaIC");
        ArtifactCoordinate {
            kind: ArtifactKind::Sources,
            identifier: artifact.to_string(),
            version: version.to_string(),
            channel: None,
            repository: self.maven_repository(version),
            path: format!("{group}/{artifact}/{version}/{artifact}-{version}-sources.jar"),
            format: ArchiveFormat::Jar,
            integrity: None,
        }
    }

    fn maven_repository(&self, version: &str) -> String {
        let snapshot = version.to_ascii_uppercase().ends_with("SNAPSHOT");
        let flavor = if snapshot { "snapshots" } else { "releases" };
        format!("{}/{}", self.intellij_repository, flavor)
    }

    /// Coordinate of a JetBrains Runtime build such as `17.0.6b829.9`.
    pub fn runtime_coordinate(
        &self,
        version: &str,
        variant: &str,
        repository: &str,
    ) -> Result<ArtifactCoordinate, ResolveError> {
        let (java, build) = split_runtime_version(version)?;
        let prefix = match variant.trim() {
            "" => "jbr".to_string(),
            v => format!("jbr_{}", v),
        };

        Ok(ArtifactCoordinate {
            kind: ArtifactKind::Runtime,
            identifier: prefix.clone(),
            version: version.to_string(),
            channel: None,
            repository: repository.trim_end_matches('/').to_string(),
            path: format!(
                "{}-{}-{}-{}-b{}.tar.gz",
                prefix, java, self.host.os, self.host.arch, build
            ),
            format: ArchiveFormat::TarGz,
            integrity: None,
        })
    }
}

/// Coordinate of a plugin in a repository with the marketplace Maven layout.
pub fn plugin_coordinate(
    repository: &str,
    id: &str,
    version: &str,
    channel: Option<&str>,
) -> ArtifactCoordinate {
    let group = match channel {
        Some(channel) => format!("{}/com/jetbrains/plugins", channel),
        None => "com/jetbrains/plugins".to_string(),
    };
    ArtifactCoordinate {
        kind: ArtifactKind::Plugin,
        identifier: id.to_string(),
        version: version.to_string(),
        channel: channel.map(str::to_string),
        repository: repository.trim_end_matches('/').to_string(),
        path: format!("{group}/{id}/{version}/{id}-{version}.zip"),
        format: ArchiveFormat::Zip,
        integrity: None,
    }
}

/// Split `17.0.6b829.9` into (`17.0.6`, `829.9`).
fn split_runtime_version(version: &str) -> Result<(&str, &str), ResolveError> {
    let invalid = |reason: &str| ResolveError::Runtime {
        version: version.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = version.trim();
    let (java, build) = trimmed
        .rsplit_once('b')
        .ok_or_else(|| invalid("expected <java version>b<build>, e.g. 17.0.6b829.9"))?;
    let java = java.trim_end_matches('-');

    for (part, label) in [(java, "java version"), (build, "build")] {
        let numeric = !part.is_empty()
            && part
                .split('.')
                .all(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
        if !numeric {
            return Err(invalid(&format!("{} '{}' is not numeric", label, part)));
        }
    }
    Ok((java, build))
}
