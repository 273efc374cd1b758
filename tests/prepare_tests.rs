//! End-to-end `prepare` tests
//!
//! Serve a platform distribution and a marketplace plugin from an
//! in-process repository, then run resolve → fetch → compose → verify
//! against a temporary cache and project.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use ij_devkit::config::{BuildConfig, EffectiveConfig};
use ij_devkit::initialize::UpdateStatus;
use ij_devkit::{
    prepare, ErrorKind, HostPlatform, PlatformType, PrepareOptions, StaticCatalog,
};

use common::{
    jar_bytes, marketplace_url, platform_zip_bytes, plugin_xml, plugin_zip_bytes, Repository,
    IC_221_URL, JAVA, KOTLIN,
};

struct Project {
    tmp: TempDir,
}

impl Project {
    fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.tmp.path().join(relative)
    }

    /// Write the plugin under test and return its jar path.
    fn plugin_under_test(&self, since: &str, until: &str) -> PathBuf {
        let jar = self.path("build/libs/mine.jar");
        fs::create_dir_all(jar.parent().unwrap()).unwrap();
        fs::write(
            &jar,
            jar_bytes(&plugin_xml(
                "org.example.mine",
                "1.0.0",
                since,
                until,
                &["com.intellij.modules.platform", "com.intellij.java", "org.example.dep"],
            )),
        )
        .unwrap();
        jar
    }

    /// Typed configuration with absolute paths under the project.
    fn config(&self, overrides: Value) -> BuildConfig {
        let mut base = json!({
            "platform": {"type": "IC", "version": "latest"},
            "plugins": ["com.intellij.java", "org.example.dep:1.2.0"],
            "catalog": {"mode": "static"},
            "cache": {"root": self.path("cache"), "lock_timeout_seconds": 5},
            "fetch": {"max_attempts": 1, "parallelism": 2},
            "sandbox": {"dir": self.path("build/idea-sandbox")},
            "self_update": {"check": false}
        });
        merge(&mut base, overrides);
        EffectiveConfig::build(None, None, Some(base))
            .unwrap()
            .build_config()
            .unwrap()
    }
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

fn repository() -> Arc<Repository> {
    Arc::new(
        Repository::new()
            .with_artifact(IC_221_URL, platform_zip_bytes("IC-221.6008.13", &[JAVA, KOTLIN]))
            .with_artifact(
                &marketplace_url("org.example.dep", "1.2.0"),
                plugin_zip_bytes(
                    "dep",
                    &plugin_xml("org.example.dep", "1.2.0", "221", "221.*", &[]),
                ),
            ),
    )
}

fn catalog() -> StaticCatalog {
    StaticCatalog::new().with_platform(PlatformType::IC, "latest", "221.6008.13")
}

fn options(plugin: &Path) -> PrepareOptions {
    PrepareOptions {
        verify: true,
        plugin_under_test: Some(plugin.to_path_buf()),
        host: HostPlatform::new("linux", "x64"),
        ..PrepareOptions::default()
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn test_prepare_fetches_composes_and_verifies() {
    let project = Project::new();
    let plugin = project.plugin_under_test("220.0", "222.*");
    let config = project.config(json!({}));
    let repo = repository();

    let prepared = prepare(&config, repo.clone(), &catalog(), &options(&plugin)).unwrap();

    assert_eq!(prepared.update, UpdateStatus::Skipped);
    assert_eq!(prepared.resolution.platform.version, "221.6008.13");
    assert_eq!(prepared.entries.len(), 2);
    assert_eq!(repo.downloads(), 2);

    let layout = prepared.sandbox.layout();
    assert_eq!(layout.platform_build.as_str(), "IC-221.6008.13");
    assert!(layout.plugins.join("java").exists());
    assert!(layout.plugins.join("org.example.dep").is_dir());

    let report = prepared.report.as_ref().unwrap();
    assert!(report.passed(), "{:?}", report.findings);
    assert!(prepared.runtime_path.is_none());
    assert!(prepared.sources_path.is_none());
}

#[test]
fn test_second_prepare_reuses_cache_and_sandbox() {
    let project = Project::new();
    let plugin = project.plugin_under_test("220.0", "222.*");
    let config = project.config(json!({}));
    let repo = repository();

    let first = prepare(&config, repo.clone(), &catalog(), &options(&plugin)).unwrap();
    assert!(!first.sandbox.reused);
    let platform_dir = first.sandbox.layout().platform.clone();
    drop(first);

    let second = prepare(&config, repo.clone(), &catalog(), &options(&plugin)).unwrap();
    assert!(second.sandbox.reused);
    assert_eq!(second.sandbox.layout().platform, platform_dir);
    assert_eq!(repo.downloads(), 2, "cached artifacts must not be downloaded again");
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_incompatible_plugin_fails_verification() {
    let project = Project::new();
    let plugin = project.plugin_under_test("220.0", "220.*");
    let config = project.config(json!({}));

    let err = prepare(&config, repository(), &catalog(), &options(&plugin)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Verification);
    assert_eq!(err.kind().exit_code(), 8);
    let message = err.to_string();
    assert!(message.contains("[220.0, 220.*]"), "{}", message);
    assert!(message.contains("221.6008.13"), "{}", message);
}

#[test]
fn test_verification_disabled_skips_report() {
    let project = Project::new();
    let plugin = project.plugin_under_test("220.0", "220.*");
    let config = project.config(json!({}));
    let options = PrepareOptions {
        verify: false,
        ..options(&plugin)
    };

    let prepared = prepare(&config, repository(), &catalog(), &options).unwrap();
    assert!(prepared.report.is_none());
}

#[test]
fn test_missing_bundled_plugin_is_resolution_error() {
    let project = Project::new();
    let plugin = project.plugin_under_test("220.0", "222.*");
    let config = project.config(json!({"plugins": ["com.intellij.database"]}));

    let err = prepare(&config, repository(), &catalog(), &options(&plugin)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(err.to_string().contains("com.intellij.database"));
}

#[test]
fn test_offline_with_empty_cache_is_fetch_error() {
    let project = Project::new();
    let plugin = project.plugin_under_test("220.0", "222.*");
    let config = project.config(json!({"fetch": {"offline": true}}));
    let repo = repository();

    let err = prepare(&config, repo.clone(), &catalog(), &options(&plugin)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert_eq!(repo.downloads(), 0);
}

#[test]
fn test_unknown_artifact_is_fetch_error() {
    let project = Project::new();
    let plugin = project.plugin_under_test("220.0", "222.*");
    let config = project.config(json!({"plugins": ["org.example.dep:9.9.9"]}));

    let err = prepare(&config, repository(), &catalog(), &options(&plugin)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
}

#[test]
fn test_unresolved_alias_is_resolution_error() {
    let project = Project::new();
    let plugin = project.plugin_under_test("220.0", "222.*");
    let config = project.config(json!({"platform": {"version": "latest-eap"}}));

    let err = prepare(&config, repository(), &catalog(), &options(&plugin)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
}
