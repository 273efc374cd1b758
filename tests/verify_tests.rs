//! Verification tests
//!
//! Compose a sandbox on a 221.6008.13 platform fixture, then verify
//! plugin-under-test descriptors against it.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use ij_cache::{CancellationToken, LockOptions};
use ij_devkit::descriptor::PluginDescriptor;
use ij_devkit::sandbox::{ComposedSandbox, CompositionRequest, PluginSource, SandboxComposer};
use ij_devkit::verifier::{Finding, Verifier};

use common::{jar_bytes, plugin_xml, write_platform, write_plugin_dir, JAVA, KOTLIN};

const BUILD: &str = "IC-221.6008.13";

fn compose(root: &Path, plugins: Vec<PluginSource>) -> ComposedSandbox {
    let platform = write_platform(&root.join("ideaIC"), BUILD, &[JAVA, KOTLIN]);
    let request = CompositionRequest {
        sandbox_dir: root.join("sandbox"),
        platform_dir: platform,
        plugins,
        overrides: vec![],
        disabled_plugins: vec![],
        keep: true,
    };
    SandboxComposer::new(LockOptions::default(), CancellationToken::new())
        .compose(&request)
        .unwrap()
}

/// Write the plugin under test as a jar and read it back.
fn plugin_under_test(root: &Path, since: &str, until: &str, depends: &[&str]) -> PluginDescriptor {
    let jar: PathBuf = root.join("my-plugin.jar");
    fs::write(
        &jar,
        jar_bytes(&plugin_xml("org.example.mine", "1.0.0", since, until, depends)),
    )
    .unwrap();
    PluginDescriptor::read(&jar).unwrap()
}

// =============================================================================
// Platform range
// =============================================================================

#[test]
fn test_platform_inside_range_passes() {
    let tmp = TempDir::new().unwrap();
    let sandbox = compose(tmp.path(), vec![]);
    let manifest = plugin_under_test(
        tmp.path(),
        "220.0",
        "222.*",
        &["com.intellij.modules.platform", "com.intellij.java"],
    );

    let report = Verifier::new().verify(sandbox.layout(), &manifest);
    assert!(report.passed(), "unexpected findings: {:?}", report.findings);
    assert!(report.into_result().is_ok());
}

#[test]
fn test_platform_above_until_build_fails() {
    let tmp = TempDir::new().unwrap();
    let sandbox = compose(tmp.path(), vec![]);
    let manifest = plugin_under_test(tmp.path(), "220.0", "220.*", &[]);

    let report = Verifier::new().verify(sandbox.layout(), &manifest);
    assert_eq!(report.findings.len(), 1);
    assert!(matches!(
        &report.findings[0],
        Finding::IncompatiblePlatform { range, .. } if range == "[220.0, 220.*]"
    ));

    let err = report.into_result().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("[220.0, 220.*]"), "{}", message);
    assert!(message.contains("221.6008.13"), "{}", message);
}

#[test]
fn test_no_since_build_skips_platform_check() {
    let tmp = TempDir::new().unwrap();
    let sandbox = compose(tmp.path(), vec![]);
    let manifest = PluginDescriptor::parse(
        "<idea-plugin><id>org.example.mine</id></idea-plugin>",
        Path::new("plugin.xml"),
    )
    .unwrap();

    assert!(Verifier::new().verify(sandbox.layout(), &manifest).passed());
}

// =============================================================================
// Dependencies
// =============================================================================

#[test]
fn test_independent_findings_are_all_reported() {
    let tmp = TempDir::new().unwrap();
    let outdated = write_plugin_dir(
        &tmp.path().join("outdated"),
        &plugin_xml("org.example.outdated", "3.1", "211", "220.*", &[]),
    );
    let sandbox = compose(
        tmp.path(),
        vec![PluginSource::local("org.example.outdated", &outdated)],
    );
    let manifest = plugin_under_test(
        tmp.path(),
        "222.0",
        "",
        &["org.example.absent", "org.example.outdated"],
    );

    let report = Verifier::new().verify(sandbox.layout(), &manifest);
    assert_eq!(report.findings.len(), 3, "{:?}", report.findings);
    assert!(matches!(report.findings[0], Finding::IncompatiblePlatform { .. }));
    assert!(matches!(
        &report.findings[1],
        Finding::MissingDependency { dependency, found_version: None, .. }
            if dependency == "org.example.absent"
    ));
    assert!(matches!(
        &report.findings[2],
        Finding::IncompatibleDependency { dependency, range, .. }
            if dependency == "org.example.outdated" && range == "[211, 220.*]"
    ));
}

#[test]
fn test_pinned_version_mismatch_reports_both_versions() {
    let tmp = TempDir::new().unwrap();
    let helper = write_plugin_dir(
        &tmp.path().join("helper"),
        &plugin_xml("org.example.helper", "1.2.0", "221", "", &[]),
    );
    let sandbox = compose(
        tmp.path(),
        vec![PluginSource::local("org.example.helper", &helper)],
    );
    let mut manifest = plugin_under_test(tmp.path(), "221", "221.*", &["org.example.helper"]);
    manifest.dependencies[0].version = Some("1.3.0".to_string());

    let report = Verifier::new().verify(sandbox.layout(), &manifest);
    assert_eq!(
        report.findings,
        vec![Finding::MissingDependency {
            plugin: "org.example.mine".to_string(),
            dependency: "org.example.helper".to_string(),
            expected_version: Some("1.3.0".to_string()),
            found_version: Some("1.2.0".to_string()),
        }]
    );
}

#[test]
fn test_optional_dependency_may_be_absent() {
    let tmp = TempDir::new().unwrap();
    let sandbox = compose(tmp.path(), vec![]);
    let xml = r#"<idea-plugin>
  <id>org.example.mine</id>
  <idea-version since-build="221"/>
  <depends optional="true" config-file="scala.xml">org.intellij.scala</depends>
</idea-plugin>"#;
    let manifest = PluginDescriptor::parse(xml, Path::new("plugin.xml")).unwrap();

    assert!(Verifier::new().verify(sandbox.layout(), &manifest).passed());
}
