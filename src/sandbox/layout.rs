use std::fs;
use std::path::{Path, PathBuf};

use ij_version::Version;
use serde::Serialize;

use super::{io_error, ComposeResult};

/// Directory layout of a composed sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxLayout {
    pub root: PathBuf,
    pub config: PathBuf,
    pub plugins: PathBuf,
    pub system: PathBuf,
    pub log: PathBuf,
    /// Unpacked platform distribution the sandbox runs against
    pub platform: PathBuf,
    pub platform_build: Version,
}

impl SandboxLayout {
    pub fn new(root: &Path, platform: &Path, platform_build: Version) -> Self {
        Self {
            root: root.to_path_buf(),
            config: root.join("config"),
            plugins: root.join("plugins"),
            system: root.join("system"),
            log: root.join("log"),
            platform: platform.to_path_buf(),
            platform_build,
        }
    }

    /// The four sandbox subtrees.
    pub fn dirs(&self) -> [&Path; 4] {
        [&self.config, &self.plugins, &self.system, &self.log]
    }

    /// Bundled plugins of the platform.
    pub fn platform_plugins(&self) -> PathBuf {
        self.platform.join("plugins")
    }

    pub fn properties_file(&self) -> PathBuf {
        self.root.join("idea.properties")
    }

    pub(super) fn create_dirs(&self) -> ComposeResult<()> {
        for dir in self.dirs() {
            fs::create_dir_all(dir).map_err(io_error(dir))?;
        }
        Ok(())
    }

    /// Remove the subtrees and the properties file.
    pub(super) fn wipe(&self) -> ComposeResult<()> {
        for dir in self.dirs() {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(dir)(e)),
            }
        }
        let properties = self.properties_file();
        match fs::remove_file(&properties) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&properties)(e)),
        }
    }
}
