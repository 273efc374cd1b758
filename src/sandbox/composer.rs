//! Sandbox composition
//!
//! Lays out `config/`, `plugins/`, `system/` and `log/` under the sandbox
//! root, links the platform's bundled plugins, installs explicit plugins
//! over them and applies file overrides last. Bundled plugins are symlinks
//! into the artifact cache, so an override that reaches through one first
//! replaces the link with a private copy.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use ij_cache::{archive, ArchiveFormat, CacheLock, CancellationToken, LockOptions};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::identity::{CompositionIdentity, InputsMarker};
use super::layout::SandboxLayout;
use super::{io_error, ComposeError, ComposeResult};
use crate::config::OverrideConfig;
use crate::descriptor::{read_platform_build, scan_plugins, PluginDescriptor};

/// Disabled plugin ids, one per line, under `config/`
pub const DISABLED_PLUGINS_FILE: &str = "disabled_plugins.txt";

/// A plugin to install into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSource {
    /// Declaration label used in error messages
    pub dependency: String,
    /// Plugin directory, jar or zip
    pub path: PathBuf,
    /// Set for cache entries, which never change under the same path
    pub immutable: bool,
}

impl PluginSource {
    pub fn cached(dependency: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            dependency: dependency.into(),
            path: path.into(),
            immutable: true,
        }
    }

    pub fn local(dependency: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            dependency: dependency.into(),
            path: path.into(),
            immutable: false,
        }
    }
}

/// Inputs of one composition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionRequest {
    pub sandbox_dir: PathBuf,
    /// Unpacked platform distribution
    pub platform_dir: PathBuf,
    /// Explicit plugins, in declaration order
    pub plugins: Vec<PluginSource>,
    /// Applied last, in order
    pub overrides: Vec<OverrideConfig>,
    pub disabled_plugins: Vec<String>,
    /// Keep the tree when the sandbox is finished
    pub keep: bool,
}

/// Builds sandboxes.
#[derive(Debug, Clone)]
pub struct SandboxComposer {
    lock: LockOptions,
    cancel: CancellationToken,
}

impl SandboxComposer {
    pub fn new(lock: LockOptions, cancel: CancellationToken) -> Self {
        Self { lock, cancel }
    }

    /// Compose (or reuse) the sandbox described by `request`.
    ///
    /// The returned sandbox holds the sandbox lock until it is dropped,
    /// finished or torn down.
    pub fn compose(&self, request: &CompositionRequest) -> ComposeResult<ComposedSandbox> {
        let root = &request.sandbox_dir;
        let lock = CacheLock::acquire(&lock_path(root), &self.lock, &self.cancel)?;

        if !request.platform_dir.is_dir() {
            return Err(ComposeError::MissingPath {
                dependency: "platform".to_string(),
                path: request.platform_dir.clone(),
            });
        }
        let build = read_platform_build(&request.platform_dir).map_err(ComposeError::PlatformBuild)?;
        let explicit = identify_plugins(&request.plugins)?;
        validate_overrides(&request.overrides)?;

        let layout = SandboxLayout::new(root, &request.platform_dir, build);
        let identity = CompositionIdentity::compute(request, &layout.platform_build)?;

        if let Some(marker) = InputsMarker::read(root) {
            if marker.identity == identity.digest && layout.dirs().iter().all(|d| d.is_dir()) {
                info!(sandbox = %root.display(), identity = %identity.digest, "sandbox inputs unchanged, reusing");
                return Ok(ComposedSandbox {
                    layout,
                    reused: true,
                    identity: identity.digest,
                    keep: request.keep,
                    lock,
                });
            }
            debug!(sandbox = %root.display(), previous = %marker.identity, "sandbox inputs changed");
        }

        info!(sandbox = %root.display(), build = %layout.platform_build, "composing sandbox");
        InputsMarker::remove(root)?;
        layout.wipe()?;
        layout.create_dirs()?;

        self.check_cancelled()?;
        write_properties(&layout)?;

        self.check_cancelled()?;
        let mut taken: BTreeSet<String> = explicit.iter().map(|p| p.target_name.clone()).collect();
        let explicit_ids: BTreeSet<&str> = explicit.iter().map(|p| p.descriptor.id.as_str()).collect();
        link_bundled(&layout, &explicit_ids, &mut taken)?;

        for plugin in &explicit {
            self.check_cancelled()?;
            install_plugin(&layout, plugin)?;
        }

        write_disabled_plugins(&layout, &request.disabled_plugins)?;

        for entry in &request.overrides {
            self.check_cancelled()?;
            apply_override(&layout, entry)?;
        }

        InputsMarker::new(&identity).write(root)?;
        info!(sandbox = %root.display(), plugins = explicit.len(), "sandbox ready");

        Ok(ComposedSandbox {
            layout,
            reused: false,
            identity: identity.digest,
            keep: request.keep,
            lock,
        })
    }

    fn check_cancelled(&self) -> ComposeResult<()> {
        if self.cancel.is_cancelled() {
            Err(ComposeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A composed sandbox, locked for the lifetime of this value.
#[derive(Debug)]
pub struct ComposedSandbox {
    pub layout: SandboxLayout,
    /// `true` when the previous composition was reused unchanged
    pub reused: bool,
    /// Identity digest recorded in the inputs marker
    pub identity: String,
    keep: bool,
    lock: CacheLock,
}

impl ComposedSandbox {
    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    pub fn keep(&self) -> bool {
        self.keep
    }

    /// Remove the sandbox tree and release the lock.
    pub fn teardown(self) -> ComposeResult<()> {
        let root = self.layout.root.clone();
        match fs::remove_dir_all(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&root)(e)),
        }
        info!(sandbox = %root.display(), "sandbox removed");
        drop(self.lock);
        Ok(())
    }

    /// Release the sandbox, removing it unless it is kept.
    pub fn finish(self) -> ComposeResult<()> {
        if self.keep {
            debug!(sandbox = %self.layout.root.display(), lock = %self.lock.path().display(), "sandbox kept");
            Ok(())
        } else {
            self.teardown()
        }
    }
}

/// An explicit plugin with its descriptor and destination name.
struct ExplicitPlugin {
    source: PluginSource,
    descriptor: PluginDescriptor,
    target_name: String,
}

fn lock_path(root: &Path) -> PathBuf {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sandbox".to_string());
    root.with_file_name(format!("{}.lock", name))
}

fn identify_plugins(sources: &[PluginSource]) -> ComposeResult<Vec<ExplicitPlugin>> {
    let mut plugins = Vec::with_capacity(sources.len());
    for source in sources {
        if !source.path.exists() {
            return Err(ComposeError::MissingPath {
                dependency: source.dependency.clone(),
                path: source.path.clone(),
            });
        }
        let descriptor =
            PluginDescriptor::read(&source.path).map_err(|e| ComposeError::UnrecognizedPlugin {
                dependency: source.dependency.clone(),
                path: source.path.clone(),
                reason: e.to_string(),
            })?;

        let stem = sanitize_name(&descriptor.id);
        let target_name = if source.path.is_file() && has_extension(&source.path, "jar") {
            format!("{}.jar", stem)
        } else {
            stem
        };
        plugins.push(ExplicitPlugin {
            source: source.clone(),
            descriptor,
            target_name,
        });
    }
    Ok(plugins)
}

fn validate_overrides(overrides: &[OverrideConfig]) -> ComposeResult<()> {
    for entry in overrides {
        let escapes = entry.target.as_os_str().is_empty()
            || entry
                .target
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ComposeError::InvalidOverride {
                target: entry.target.clone(),
            });
        }
        if !entry.source.exists() {
            return Err(ComposeError::MissingPath {
                dependency: format!("override {}", entry.target.display()),
                path: entry.source.clone(),
            });
        }
    }
    Ok(())
}

fn write_properties(layout: &SandboxLayout) -> ComposeResult<()> {
    let defaults = layout.platform.join("bin").join("idea.properties");
    let mut content = match fs::read_to_string(&defaults) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(platform = %layout.platform.display(), "platform ships no idea.properties");
            String::new()
        }
        Err(e) => return Err(io_error(&defaults)(e)),
    };
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }

    content.push_str("\n# sandbox\n");
    for (key, path) in [
        ("idea.config.path", &layout.config),
        ("idea.plugins.path", &layout.plugins),
        ("idea.system.path", &layout.system),
        ("idea.log.path", &layout.log),
    ] {
        content.push_str(&format!("{}={}\n", key, property_path(path)));
    }

    let target = layout.properties_file();
    fs::write(&target, content).map_err(io_error(&target))
}

fn link_bundled(
    layout: &SandboxLayout,
    explicit_ids: &BTreeSet<&str>,
    taken: &mut BTreeSet<String>,
) -> ComposeResult<()> {
    let bundled_dir = layout.platform_plugins();
    let bundled = scan_plugins(&bundled_dir).map_err(ComposeError::PlatformBuild)?;

    let mut linked = 0usize;
    for plugin in bundled {
        let name = plugin.file_name();
        if let Some(descriptor) = &plugin.descriptor {
            if explicit_ids.contains(descriptor.id.as_str()) {
                debug!(plugin = %descriptor.id, "bundled plugin replaced by explicit plugin");
                continue;
            }
        }
        let name = if taken.insert(name.clone()) {
            name
        } else {
            let renamed = unused_name(&name, taken);
            warn!(
                plugin = %name,
                installed_as = %renamed,
                "bundled plugin name collides with an explicit plugin, installing under another name"
            );
            taken.insert(renamed.clone());
            renamed
        };

        let target = layout.plugins.join(&name);
        link_or_copy(&plugin.path, &target)?;
        linked += 1;
    }

    debug!(count = linked, "bundled plugins linked");
    Ok(())
}

/// `name` with a `-bundled` suffix (before `.jar`) that no entry in `taken` uses.
fn unused_name(name: &str, taken: &BTreeSet<String>) -> String {
    let (stem, ext) = match name.strip_suffix(".jar") {
        Some(stem) => (stem, ".jar"),
        None => (name, ""),
    };
    let mut candidate = format!("{stem}-bundled{ext}");
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{stem}-bundled-{n}{ext}");
        n += 1;
    }
    candidate
}

fn install_plugin(layout: &SandboxLayout, plugin: &ExplicitPlugin) -> ComposeResult<()> {
    let source = &plugin.source.path;
    let target = layout.plugins.join(&plugin.target_name);
    remove_path(&target)?;

    if source.is_dir() || has_extension(source, "jar") {
        copy_tree(source, &target)?;
    } else {
        let staging = layout
            .plugins
            .join(format!(".{}.unpack", plugin.target_name));
        remove_path(&staging)?;
        let content = archive::unpack(source, ArchiveFormat::Zip, &staging, &plugin.target_name)
            .map_err(|e| ComposeError::Archive {
                path: source.clone(),
                source: e,
            })?;
        fs::rename(&content, &target).map_err(io_error(&target))?;
        remove_path(&staging)?;
    }

    debug!(plugin = %plugin.descriptor.id, target = %target.display(), "plugin installed");
    Ok(())
}

fn write_disabled_plugins(layout: &SandboxLayout, disabled: &[String]) -> ComposeResult<()> {
    if disabled.is_empty() {
        return Ok(());
    }
    let target = layout.config.join(DISABLED_PLUGINS_FILE);
    let mut content = disabled.join("\n");
    content.push('\n');
    fs::write(&target, content).map_err(io_error(&target))
}

fn apply_override(layout: &SandboxLayout, entry: &OverrideConfig) -> ComposeResult<()> {
    materialize_links(&layout.root, &entry.target)?;
    let target = layout.root.join(&entry.target);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    remove_path(&target)?;
    copy_tree(&entry.source, &target)?;
    debug!(source = %entry.source.display(), target = %target.display(), "override applied");
    Ok(())
}

/// Replace every symlinked ancestor of `root/relative` with a copy of what
/// it points to, so writes below it stay inside the sandbox.
fn materialize_links(root: &Path, relative: &Path) -> ComposeResult<()> {
    let mut current = root.to_path_buf();
    let mut components: Vec<Component> = relative
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    components.pop();

    for component in components {
        current.push(component);
        let meta = match fs::symlink_metadata(&current) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(&current)(e)),
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        let linked = fs::canonicalize(&current).map_err(io_error(&current))?;
        fs::remove_file(&current).map_err(io_error(&current))?;
        copy_tree(&linked, &current)?;
        debug!(path = %current.display(), source = %linked.display(), "replaced link with copy");
    }
    Ok(())
}

#[cfg(unix)]
fn link_or_copy(source: &Path, target: &Path) -> ComposeResult<()> {
    std::os::unix::fs::symlink(source, target).map_err(io_error(target))
}

#[cfg(not(unix))]
fn link_or_copy(source: &Path, target: &Path) -> ComposeResult<()> {
    copy_tree(source, target)
}

/// Copy a file or directory tree.
fn copy_tree(source: &Path, target: &Path) -> ComposeResult<()> {
    if source.is_file() {
        fs::copy(source, target).map_err(io_error(target))?;
        return Ok(());
    }

    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|e| ComposeError::Io {
            path: source.to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop")),
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let dest = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(io_error(&dest))?;
        } else {
            fs::copy(entry.path(), &dest).map_err(io_error(&dest))?;
        }
    }
    Ok(())
}

/// Remove a file, symlink or directory; missing paths are fine.
fn remove_path(path: &Path) -> ComposeResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error(path)(e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| {
        warn!(path = %path.display(), error = %e, "cannot remove sandbox entry");
        io_error(path)(e)
    })
}

fn property_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn sanitize_name(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn descriptor(id: &str) -> String {
        format!(
            r#"<idea-plugin><id>{id}</id><version>1.0</version><idea-version since-build="221"/></idea-plugin>"#
        )
    }

    fn plugin_dir(parent: &Path, name: &str, id: &str) -> PathBuf {
        let dir = parent.join(name);
        fs::create_dir_all(dir.join("META-INF")).unwrap();
        fs::write(dir.join("META-INF/plugin.xml"), descriptor(id)).unwrap();
        dir
    }

    fn platform(tmp: &Path) -> PathBuf {
        let dir = tmp.join("ideaIC");
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("build.txt"), "IC-221.6008.13").unwrap();
        fs::write(dir.join("bin/idea.properties"), "idea.max.intellisense.filesize=2500").unwrap();
        plugin_dir(&dir.join("plugins"), "java", "com.intellij.java");
        plugin_dir(&dir.join("plugins"), "Kotlin", "org.jetbrains.kotlin");
        dir
    }

    fn request(tmp: &Path) -> CompositionRequest {
        CompositionRequest {
            sandbox_dir: tmp.join("sandbox"),
            platform_dir: platform(tmp),
            plugins: Vec::new(),
            overrides: Vec::new(),
            disabled_plugins: Vec::new(),
            keep: true,
        }
    }

    fn composer() -> SandboxComposer {
        SandboxComposer::new(LockOptions::default(), CancellationToken::new())
    }

    #[test]
    fn test_compose_layout_and_properties() {
        let tmp = TempDir::new().unwrap();
        let sandbox = composer().compose(&request(tmp.path())).unwrap();
        let layout = sandbox.layout();

        for dir in layout.dirs() {
            assert!(dir.is_dir());
        }
        let props = fs::read_to_string(layout.properties_file()).unwrap();
        assert!(props.starts_with("idea.max.intellisense.filesize=2500\n"));
        assert!(props.contains(&format!("idea.plugins.path={}", property_path(&layout.plugins))));
        assert!(props.contains("idea.log.path="));
        assert!(layout.plugins.join("java").exists());
        assert!(layout.plugins.join("Kotlin").exists());
        assert!(!sandbox.reused);
        assert!(layout.root.join(crate::sandbox::INPUTS_MARKER).is_file());
    }

    #[test]
    fn test_explicit_plugin_replaces_bundled() {
        let tmp = TempDir::new().unwrap();
        let mut req = request(tmp.path());
        let newer = plugin_dir(&tmp.path().join("local"), "kotlin-dev", "org.jetbrains.kotlin");
        req.plugins.push(PluginSource::local("org.jetbrains.kotlin", &newer));

        let sandbox = composer().compose(&req).unwrap();
        let plugins = &sandbox.layout().plugins;

        assert!(!plugins.join("Kotlin").exists());
        assert!(plugins.join("org.jetbrains.kotlin/META-INF/plugin.xml").is_file());
        let kotlin: Vec<_> = scan_plugins(plugins)
            .unwrap()
            .into_iter()
            .filter(|p| p.descriptor.as_ref().map(|d| d.id.as_str()) == Some("org.jetbrains.kotlin"))
            .collect();
        assert_eq!(kotlin.len(), 1);
    }

    #[test]
    fn test_jar_plugin_installed_as_file() {
        let tmp = TempDir::new().unwrap();
        let jar = tmp.path().join("tool.jar");
        let mut zip = zip::ZipWriter::new(fs::File::create(&jar).unwrap());
        zip.start_file("META-INF/plugin.xml", SimpleFileOptions::default()).unwrap();
        zip.write_all(descriptor("org.example.tool").as_bytes()).unwrap();
        zip.finish().unwrap();

        let mut req = request(tmp.path());
        req.plugins.push(PluginSource::cached("org.example.tool:1.0", &jar));
        let sandbox = composer().compose(&req).unwrap();
        assert!(sandbox.layout().plugins.join("org.example.tool.jar").is_file());
    }

    #[test]
    fn test_missing_plugin_names_dependency() {
        let tmp = TempDir::new().unwrap();
        let mut req = request(tmp.path());
        req.plugins
            .push(PluginSource::local("org.example.gone", tmp.path().join("gone")));

        let err = composer().compose(&req).unwrap_err();
        assert!(matches!(err, ComposeError::MissingPath { .. }));
        assert!(err.to_string().contains("org.example.gone"));
    }

    #[test]
    fn test_unrecognized_plugin() {
        let tmp = TempDir::new().unwrap();
        let junk = tmp.path().join("junk");
        fs::create_dir_all(&junk).unwrap();
        let mut req = request(tmp.path());
        req.plugins.push(PluginSource::local("org.example.junk", &junk));

        let err = composer().compose(&req).unwrap_err();
        assert!(matches!(err, ComposeError::UnrecognizedPlugin { .. }));
        assert!(err.to_string().contains("org.example.junk"));
    }

    #[test]
    fn test_disabled_plugins_and_overrides() {
        let tmp = TempDir::new().unwrap();
        let options = tmp.path().join("ide.general.xml");
        fs::write(&options, "<application/>").unwrap();

        let mut req = request(tmp.path());
        req.disabled_plugins = vec!["org.jetbrains.kotlin".to_string(), "Git4Idea".to_string()];
        req.overrides.push(OverrideConfig {
            source: options,
            target: PathBuf::from("config/options/ide.general.xml"),
        });

        let sandbox = composer().compose(&req).unwrap();
        let layout = sandbox.layout();
        assert_eq!(
            fs::read_to_string(layout.config.join(DISABLED_PLUGINS_FILE)).unwrap(),
            "org.jetbrains.kotlin\nGit4Idea\n"
        );
        assert_eq!(
            fs::read_to_string(layout.config.join("options/ide.general.xml")).unwrap(),
            "<application/>"
        );
    }

    #[test]
    fn test_override_inside_bundled_plugin_leaves_platform_untouched() {
        let tmp = TempDir::new().unwrap();
        let patched = tmp.path().join("patched.xml");
        fs::write(&patched, "patched").unwrap();

        let mut req = request(tmp.path());
        let original = req.platform_dir.join("plugins/java/META-INF/plugin.xml");
        let pristine = fs::read_to_string(&original).unwrap();
        req.overrides.push(OverrideConfig {
            source: patched,
            target: PathBuf::from("plugins/java/META-INF/plugin.xml"),
        });

        let sandbox = composer().compose(&req).unwrap();
        let java = sandbox.layout().plugins.join("java");

        assert_eq!(fs::read_to_string(&original).unwrap(), pristine);
        assert!(!fs::symlink_metadata(&java).unwrap().file_type().is_symlink());
        assert_eq!(
            fs::read_to_string(java.join("META-INF/plugin.xml")).unwrap(),
            "patched"
        );
    }

    #[test]
    fn test_bundled_plugin_kept_when_name_collides() {
        let tmp = TempDir::new().unwrap();
        let mut req = request(tmp.path());
        plugin_dir(
            &req.platform_dir.join("plugins"),
            "org.example.tool",
            "com.example.legacy",
        );
        let tool = plugin_dir(&tmp.path().join("local"), "tool", "org.example.tool");
        req.plugins.push(PluginSource::local("org.example.tool", &tool));

        let sandbox = composer().compose(&req).unwrap();
        let plugins = &sandbox.layout().plugins;
        let ids: BTreeSet<String> = scan_plugins(plugins)
            .unwrap()
            .into_iter()
            .filter_map(|p| p.descriptor.map(|d| d.id))
            .collect();

        assert!(ids.contains("org.example.tool"));
        assert!(ids.contains("com.example.legacy"));
        assert!(plugins.join("org.example.tool-bundled").exists());
    }

    #[test]
    fn test_unused_name() {
        let mut taken = BTreeSet::new();
        assert_eq!(unused_name("tool", &taken), "tool-bundled");
        assert_eq!(unused_name("tool.jar", &taken), "tool-bundled.jar");
        taken.insert("tool-bundled".to_string());
        assert_eq!(unused_name("tool", &taken), "tool-bundled-2");
    }

    #[test]
    fn test_escaping_override_rejected() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("f");
        fs::write(&source, "x").unwrap();

        for target in ["../outside", "/etc/passwd", ""] {
            let mut req = request(tmp.path());
            req.overrides.push(OverrideConfig {
                source: source.clone(),
                target: PathBuf::from(target),
            });
            let err = composer().compose(&req).unwrap_err();
            assert!(matches!(err, ComposeError::InvalidOverride { .. }), "{target}");
        }
    }

    #[test]
    fn test_teardown_removes_tree() {
        let tmp = TempDir::new().unwrap();
        let mut req = request(tmp.path());
        req.keep = false;
        let sandbox = composer().compose(&req).unwrap();
        let root = sandbox.layout().root.clone();

        sandbox.finish().unwrap();
        assert!(!root.exists());
        assert!(tmp.path().join("ideaIC/plugins/java").is_dir());
    }

    #[test]
    fn test_cancelled_before_lock() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let composer = SandboxComposer::new(LockOptions::default(), cancel);
        assert!(composer.compose(&request(tmp.path())).is_err());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("org.example-tool_1"), "org.example-tool_1");
        assert_eq!(sanitize_name("My Plugin/x"), "My_Plugin_x");
    }
}
