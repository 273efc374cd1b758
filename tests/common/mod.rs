//! Shared fixtures for integration tests
//!
//! Builds fake platform distributions and plugins on disk or as archive
//! bytes, and serves them from an in-process repository transport.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use ij_cache::{DownloadInfo, Transport, TransportError};
use zip::write::SimpleFileOptions;

/// `plugin.xml` content. An empty `until` omits the attribute.
pub fn plugin_xml(id: &str, version: &str, since: &str, until: &str, depends: &[&str]) -> String {
    let until_attr = if until.is_empty() {
        String::new()
    } else {
        format!(r#" until-build="{}""#, until)
    };
    let depends: String = depends
        .iter()
        .map(|d| format!("  <depends>{}</depends>\n", d))
        .collect();
    format!(
        "<idea-plugin>\n  <id>{id}</id>\n  <name>{id}</name>\n  <version>{version}</version>\n  <idea-version since-build=\"{since}\"{until_attr}/>\n{depends}</idea-plugin>\n"
    )
}

/// A jar holding `META-INF/plugin.xml`.
pub fn jar_bytes(xml: &str) -> Vec<u8> {
    zip_bytes(&[("META-INF/plugin.xml", xml.as_bytes().to_vec())])
}

/// A marketplace-style plugin zip: `<name>/lib/<name>.jar`.
pub fn plugin_zip_bytes(name: &str, xml: &str) -> Vec<u8> {
    let entry = format!("{name}/lib/{name}.jar");
    zip_bytes(&[(entry.as_str(), jar_bytes(xml))])
}

pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A bundled plugin: directory name, id, since, until.
pub struct Bundled<'a> {
    pub dir: &'a str,
    pub id: &'a str,
    pub since: &'a str,
    pub until: &'a str,
}

pub const JAVA: Bundled<'static> = Bundled {
    dir: "java",
    id: "com.intellij.java",
    since: "221.6008",
    until: "221.6008.*",
};

pub const KOTLIN: Bundled<'static> = Bundled {
    dir: "Kotlin",
    id: "org.jetbrains.kotlin",
    since: "221",
    until: "221.*",
};

/// Platform distribution as zip bytes, laid out like the Maven artifact.
pub fn platform_zip_bytes(build: &str, bundled: &[Bundled]) -> Vec<u8> {
    let mut entries: Vec<(String, Vec<u8>)> = vec![
        ("build.txt".to_string(), build.as_bytes().to_vec()),
        (
            "bin/idea.properties".to_string(),
            b"idea.max.intellisense.filesize=2500\n".to_vec(),
        ),
    ];
    for plugin in bundled {
        entries.push((
            format!("plugins/{0}/lib/{0}.jar", plugin.dir),
            jar_bytes(&plugin_xml(plugin.id, build, plugin.since, plugin.until, &[])),
        ));
    }
    let borrowed: Vec<(&str, Vec<u8>)> = entries
        .iter()
        .map(|(name, content)| (name.as_str(), content.clone()))
        .collect();
    zip_bytes(&borrowed)
}

/// Unpacked platform distribution on disk.
pub fn write_platform(dir: &Path, build: &str, bundled: &[Bundled]) -> PathBuf {
    fs::create_dir_all(dir.join("bin")).unwrap();
    fs::write(dir.join("build.txt"), build).unwrap();
    fs::write(dir.join("bin/idea.properties"), "idea.max.intellisense.filesize=2500\n").unwrap();
    for plugin in bundled {
        let lib = dir.join("plugins").join(plugin.dir).join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(
            lib.join(format!("{}.jar", plugin.dir)),
            jar_bytes(&plugin_xml(plugin.id, build, plugin.since, plugin.until, &[])),
        )
        .unwrap();
    }
    dir.to_path_buf()
}

/// Plugin directory with `META-INF/plugin.xml`.
pub fn write_plugin_dir(dir: &Path, xml: &str) -> PathBuf {
    fs::create_dir_all(dir.join("META-INF")).unwrap();
    fs::write(dir.join("META-INF/plugin.xml"), xml).unwrap();
    dir.to_path_buf()
}

/// Serves fixed bodies by URL and counts transfers.
#[derive(Default)]
pub struct Repository {
    artifacts: HashMap<String, Vec<u8>>,
    texts: HashMap<String, String>,
    pub downloads: AtomicUsize,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, url: &str, body: Vec<u8>) -> Self {
        self.artifacts.insert(url.to_string(), body);
        self
    }

    pub fn with_text(mut self, url: &str, body: &str) -> Self {
        self.texts.insert(url.to_string(), body.to_string());
        self
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl Transport for Repository {
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<DownloadInfo, TransportError> {
        let body = self.artifacts.get(url).ok_or_else(|| TransportError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        sink.write_all(body).map_err(|source| TransportError::Sink {
            url: url.to_string(),
            source,
        })?;
        Ok(DownloadInfo {
            bytes: body.len() as u64,
            content_length: Some(body.len() as u64),
        })
    }

    fn get_text(&self, url: &str) -> Result<String, TransportError> {
        self.texts.get(url).cloned().ok_or_else(|| TransportError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

pub const IC_221_URL: &str = "https://www.jetbrains.com/intellij-repository/releases/com/jetbrains/intellij/idea/ideaIC/221.6008.13/ideaIC-221.6008.13.zip";

pub fn marketplace_url(id: &str, version: &str) -> String {
    format!("https://plugins.jetbrains.com/maven/com/jetbrains/plugins/{id}/{version}/{id}-{version}.zip")
}
