//! Compatibility verification
//!
//! Checks a plugin-under-test against a composed sandbox:
//! 1. the platform build lies inside the plugin's `idea-version` range
//! 2. every required dependency is installed (at the pinned version, if any)
//! 3. every installed dependency supports the platform build
//!
//! All findings are collected; verification never stops at the first one.

use std::collections::BTreeMap;
use std::fmt;

use ij_version::{RangeCheck, Version};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::descriptor::{scan_plugins, PluginDescriptor, PluginManifest};
use crate::sandbox::SandboxLayout;

/// Dependency ids satisfied by the platform itself
const PLATFORM_MODULE_PREFIX: &str = "com.intellij.modules.";
const PLATFORM_ID: &str = "com.intellij";

/// A single verification problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    IncompatiblePlatform {
        plugin: String,
        platform: String,
        range: String,
        reason: String,
    },
    MissingDependency {
        plugin: String,
        dependency: String,
        expected_version: Option<String>,
        found_version: Option<String>,
    },
    IncompatibleDependency {
        dependency: String,
        dependency_version: Option<String>,
        platform: String,
        range: String,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::IncompatiblePlatform {
                plugin,
                platform,
                range,
                reason,
            } => write!(
                f,
                "{} requires platform {} but the sandbox runs {} ({})",
                plugin, range, platform, reason
            ),
            Finding::MissingDependency {
                plugin,
                dependency,
                expected_version,
                found_version,
            } => match (expected_version, found_version) {
                (Some(expected), Some(found)) => write!(
                    f,
                    "{} depends on {} {} but {} is installed",
                    plugin, dependency, expected, found
                ),
                (Some(expected), None) => write!(
                    f,
                    "{} depends on {} {}, which is not installed",
                    plugin, dependency, expected
                ),
                _ => write!(f, "{} depends on {}, which is not installed", plugin, dependency),
            },
            Finding::IncompatibleDependency {
                dependency,
                dependency_version,
                platform,
                range,
            } => write!(
                f,
                "dependency {} {} supports {} which excludes platform {}",
                dependency,
                dependency_version.as_deref().unwrap_or("(unversioned)"),
                range,
                platform
            ),
        }
    }
}

/// Outcome of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub plugin_id: String,
    pub platform_build: String,
    pub findings: Vec<Finding>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }

    /// `Ok` when nothing was found, otherwise an error listing every finding.
    pub fn into_result(self) -> Result<(), VerificationError> {
        if self.passed() {
            Ok(())
        } else {
            Err(VerificationError {
                plugin_id: self.plugin_id,
                platform_build: self.platform_build,
                findings: self.findings,
            })
        }
    }
}

/// Verification failed with one or more findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationError {
    pub plugin_id: String,
    pub platform_build: String,
    pub findings: Vec<Finding>,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "verification of {} against {} failed with {} finding(s):",
            self.plugin_id,
            self.platform_build,
            self.findings.len()
        )?;
        for finding in &self.findings {
            write!(f, "\n  - {}", finding)?;
        }
        Ok(())
    }
}

impl std::error::Error for VerificationError {}

/// Checks plugins against sandboxes.
#[derive(Debug, Clone, Default)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, layout: &SandboxLayout, manifest: &PluginManifest) -> VerificationReport {
        let build = &layout.platform_build;
        let mut findings = Vec::new();

        if let Some(finding) = check_platform(manifest, build) {
            findings.push(finding);
        }

        let installed = index_installed(layout);
        for dependency in manifest.dependencies.iter().filter(|d| !d.optional) {
            let found = installed.get(dependency.id.as_str());

            let Some(found) = found else {
                if is_platform_module(&dependency.id) {
                    debug!(dependency = %dependency.id, "provided by the platform");
                    continue;
                }
                findings.push(Finding::MissingDependency {
                    plugin: manifest.id.clone(),
                    dependency: dependency.id.clone(),
                    expected_version: dependency.version.clone(),
                    found_version: None,
                });
                continue;
            };

            if let Some(expected) = &dependency.version {
                if !same_version(expected, found.version.as_deref()) {
                    findings.push(Finding::MissingDependency {
                        plugin: manifest.id.clone(),
                        dependency: dependency.id.clone(),
                        expected_version: Some(expected.clone()),
                        found_version: found.version.clone(),
                    });
                    continue;
                }
            }

            match found.compatibility() {
                Ok(Some(range)) if !range.contains(build) => {
                    findings.push(Finding::IncompatibleDependency {
                        dependency: dependency.id.clone(),
                        dependency_version: found.version.clone(),
                        platform: build.to_string(),
                        range: range.to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(dependency = %dependency.id, error = %e, "cannot read dependency range"),
            }
        }

        let report = VerificationReport {
            plugin_id: manifest.id.clone(),
            platform_build: build.to_string(),
            findings,
        };
        if report.passed() {
            info!(plugin = %report.plugin_id, platform = %report.platform_build, "verification passed");
        } else {
            warn!(
                plugin = %report.plugin_id,
                platform = %report.platform_build,
                findings = report.findings.len(),
                "verification failed"
            );
        }
        report
    }
}

fn check_platform(manifest: &PluginManifest, build: &Version) -> Option<Finding> {
    let incompatible = |range: String, reason: String| Finding::IncompatiblePlatform {
        plugin: manifest.id.clone(),
        platform: build.to_string(),
        range,
        reason,
    };

    let range = match manifest.compatibility() {
        Ok(Some(range)) => range,
        Ok(None) => {
            debug!(plugin = %manifest.id, "no since-build declared, platform range not checked");
            return None;
        }
        Err(e) => {
            let declared = format!(
                "[{}, {}]",
                manifest.since_build.as_deref().unwrap_or(""),
                manifest.until_build.as_deref().unwrap_or("")
            );
            return Some(incompatible(declared, e.to_string()));
        }
    };

    let reason = match range.check(build) {
        RangeCheck::Within => return None,
        RangeCheck::BelowSince => format!("{} is older than since-build {}", build, range.since()),
        RangeCheck::AboveUntil => match range.until() {
            Some(until) => format!("{} is newer than until-build {}", build, until),
            None => format!("{} is outside the range", build),
        },
        RangeCheck::ProductMismatch { expected, actual } => {
            format!("product {} does not match required product {}", actual, expected)
        }
    };
    Some(incompatible(range.to_string(), reason))
}

/// Installed plugins by id and module alias. Sandbox plugins shadow
/// platform plugins with the same id.
fn index_installed(layout: &SandboxLayout) -> BTreeMap<String, PluginDescriptor> {
    let mut index = BTreeMap::new();
    for dir in [layout.plugins.clone(), layout.platform_plugins()] {
        let plugins = match scan_plugins(&dir) {
            Ok(plugins) => plugins,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot list plugins");
                continue;
            }
        };
        for descriptor in plugins.into_iter().filter_map(|p| p.descriptor) {
            for key in std::iter::once(&descriptor.id).chain(descriptor.modules.iter()) {
                index.entry(key.clone()).or_insert_with(|| descriptor.clone());
            }
        }
    }
    index
}

fn is_platform_module(id: &str) -> bool {
    id == PLATFORM_ID || id.starts_with(PLATFORM_MODULE_PREFIX)
}

fn same_version(expected: &str, found: Option<&str>) -> bool {
    let Some(found) = found else {
        return false;
    };
    match (Version::parse(expected), Version::parse(found)) {
        (Ok(a), Ok(b)) => a == b,
        _ => expected == found,
    }
}
