//! Plugin and platform descriptors
//!
//! Reads `META-INF/plugin.xml` from a plugin directory, a plugin jar, a
//! plugin directory's `lib/*.jar`, or a plugin zip, and the platform build
//! number from `build.txt` (falling back to `product-info.json`).
//!
//! The descriptor is parsed as XML, but only the handful of top-level
//! elements the verifier needs are extracted; it is not validated against
//! a schema.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use ij_version::{CompatibilityRange, ParseError, RangeError, Version};
use roxmltree::{Document, Node, ParsingOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/// Descriptor location inside a plugin jar or directory
pub const PLUGIN_XML: &str = "META-INF/plugin.xml";

/// Descriptor errors
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    #[error("no META-INF/plugin.xml found in {}", path.display())]
    NotFound { path: PathBuf },

    #[error("invalid descriptor {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("invalid build number in {}: {source}", path.display())]
    Build {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("invalid compatibility range in {}: {source}", path.display())]
    Range {
        path: PathBuf,
        #[source]
        source: RangeError,
    },
}

/// A `<depends>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorDependency {
    pub id: String,
    #[serde(default)]
    pub optional: bool,
    /// Version pinned by the build configuration, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Identity and compatibility data of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub version: Option<String>,
    pub since_build: Option<String>,
    pub until_build: Option<String>,
    pub dependencies: Vec<DescriptorDependency>,
    /// Module aliases declared with `<module value="..."/>`
    pub modules: Vec<String>,
}

/// The descriptor of the plugin under test.
pub type PluginManifest = PluginDescriptor;

impl PluginDescriptor {
    /// Parse descriptor text. `origin` is only used in error messages.
    ///
    /// Only direct children of `<idea-plugin>` are considered, so elements
    /// nested in extension declarations never leak into the identity.
    pub fn parse(xml: &str, origin: &Path) -> Result<Self, DescriptorError> {
        let invalid = |reason: String| DescriptorError::Invalid {
            path: origin.to_path_buf(),
            reason,
        };
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let document =
            Document::parse_with_options(xml, options).map_err(|e| invalid(e.to_string()))?;
        let root = document.root_element();
        if !root.has_tag_name("idea-plugin") {
            return Err(invalid(format!(
                "root element is <{}>, expected <idea-plugin>",
                root.tag_name().name()
            )));
        }

        let name = child_text(root, "name");
        let id = child_text(root, "id")
            .or_else(|| name.clone())
            .ok_or_else(|| invalid("neither <id> nor <name> is present".to_string()))?;

        let idea_version = children(root, "idea-version").next();
        let version_attr = |attr: &str| {
            idea_version
                .and_then(|node| node.attribute(attr))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let dependencies = children(root, "depends")
            .filter_map(|node| {
                let id = text_of(node)?;
                Some(DescriptorDependency {
                    id,
                    optional: node.attribute("optional").map(str::trim) == Some("true"),
                    version: None,
                })
            })
            .collect();

        let modules = children(root, "module")
            .filter_map(|node| node.attribute("value"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();

        Ok(Self {
            id,
            name,
            version: child_text(root, "version"),
            since_build: version_attr("since-build"),
            until_build: version_attr("until-build"),
            dependencies,
            modules,
        })
    }

    /// Read the descriptor of a plugin at `path`.
    pub fn read(path: &Path) -> Result<Self, DescriptorError> {
        let xml = read_descriptor_text(path)?;
        Self::parse(&xml, path)
    }

    /// The `idea-version` range, or `None` when no `since-build` is declared.
    pub fn compatibility(&self) -> Result<Option<CompatibilityRange>, DescriptorError> {
        let Some(since) = &self.since_build else {
            return Ok(None);
        };
        CompatibilityRange::parse(since, self.until_build.as_deref())
            .map(Some)
            .map_err(|source| DescriptorError::Range {
                path: PathBuf::from(&self.id),
                source,
            })
    }

    /// Whether this plugin answers to `id`, directly or as a module alias.
    pub fn provides(&self, id: &str) -> bool {
        self.id == id || self.modules.iter().any(|m| m == id)
    }
}

/// A plugin found in a plugins directory.
#[derive(Debug, Clone)]
pub struct InstalledPlugin {
    pub path: PathBuf,
    /// `None` when the entry carries no readable descriptor
    pub descriptor: Option<PluginDescriptor>,
}

impl InstalledPlugin {
    /// Directory or file name of the entry.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// List the plugins (directories and jars) inside `dir`, sorted by name.
///
/// A missing directory yields an empty list.
pub fn scan_plugins(dir: &Path) -> Result<Vec<InstalledPlugin>, DescriptorError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(DescriptorError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DescriptorError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() || has_extension(&path, "jar") {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let descriptor = match PluginDescriptor::read(&path) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "no readable plugin descriptor");
                    None
                }
            };
            InstalledPlugin { path, descriptor }
        })
        .collect())
}

/// Read the platform build number of an unpacked distribution.
pub fn read_platform_build(platform_dir: &Path) -> Result<Version, DescriptorError> {
    let build_txt = platform_dir.join("build.txt");
    if build_txt.is_file() {
        let raw = read_to_string(&build_txt)?;
        return Version::parse(raw.trim()).map_err(|source| DescriptorError::Build {
            path: build_txt,
            source,
        });
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ProductInfo {
        build_number: String,
        product_code: Option<String>,
    }

    let product_info = platform_dir.join("product-info.json");
    if product_info.is_file() {
        let raw = read_to_string(&product_info)?;
        let info: ProductInfo =
            serde_json::from_str(&raw).map_err(|e| DescriptorError::Invalid {
                path: product_info.clone(),
                reason: e.to_string(),
            })?;
        let build = match info.product_code {
            Some(code) if !code.is_empty() => format!("{}-{}", code, info.build_number),
            _ => info.build_number,
        };
        return Version::parse(&build).map_err(|source| DescriptorError::Build {
            path: product_info,
            source,
        });
    }

    Err(DescriptorError::Invalid {
        path: platform_dir.to_path_buf(),
        reason: "neither build.txt nor product-info.json is present".to_string(),
    })
}

fn read_descriptor_text(path: &Path) -> Result<String, DescriptorError> {
    if path.is_dir() {
        let direct = path.join(PLUGIN_XML);
        if direct.is_file() {
            return read_to_string(&direct);
        }

        let lib = path.join("lib");
        let mut jars: Vec<PathBuf> = match fs::read_dir(&lib) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| has_extension(p, "jar"))
                .collect(),
            Err(_) => Vec::new(),
        };
        jars.sort();
        for jar in jars {
            if let Some(xml) = descriptor_from_file(&jar)? {
                return Ok(xml);
            }
        }
        return Err(DescriptorError::NotFound {
            path: path.to_path_buf(),
        });
    }

    if has_extension(path, "xml") {
        return read_to_string(path);
    }

    if path.is_file() {
        return descriptor_from_file(path)?.ok_or_else(|| DescriptorError::NotFound {
            path: path.to_path_buf(),
        });
    }

    Err(DescriptorError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
    })
}

fn descriptor_from_file(path: &Path) -> Result<Option<String>, DescriptorError> {
    let file = File::open(path).map_err(|source| DescriptorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| archive_error(path, e))?;
    descriptor_from_archive(&mut archive, true).map_err(|e| archive_error(path, e))
}

/// Look for the descriptor at the archive root, then (for plugin zips)
/// inside jars under a `lib/` directory.
fn descriptor_from_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    search_nested: bool,
) -> Result<Option<String>, ZipError> {
    match archive.by_name(PLUGIN_XML) {
        Ok(mut entry) => {
            let mut xml = String::new();
            entry.read_to_string(&mut xml)?;
            return Ok(Some(xml));
        }
        Err(ZipError::FileNotFound) => {}
        Err(e) => return Err(e),
    }
    if !search_nested {
        return Ok(None);
    }

    let mut nested: Vec<String> = archive
        .file_names()
        .filter(|name| name.ends_with(".jar") && name.contains("lib/"))
        .map(str::to_string)
        .collect();
    nested.sort();

    for name in nested {
        let mut bytes = Vec::new();
        archive.by_name(&name)?.read_to_end(&mut bytes)?;
        let mut inner = ZipArchive::new(Cursor::new(bytes))?;
        if let Some(xml) = descriptor_from_archive(&mut inner, false)? {
            return Ok(Some(xml));
        }
    }
    Ok(None)
}

fn archive_error(path: &Path, e: ZipError) -> DescriptorError {
    DescriptorError::Archive {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn read_to_string(path: &Path) -> Result<String, DescriptorError> {
    fs::read_to_string(path).map_err(|source| DescriptorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Direct element children of `node` named `tag`.
fn children<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |child| child.is_element() && child.has_tag_name(tag))
}

/// Trimmed text of the first direct child named `tag`.
fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    children(node, tag).find_map(text_of)
}

/// Concatenated text and CDATA of `node`, trimmed; `None` when blank.
fn text_of(node: Node<'_, '_>) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
