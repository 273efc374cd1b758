//! On-disk cache layout
//!
//! ```text
//! <root>/
//!   platforms/<key>/entry.json      completion marker, written last
//!   platforms/<key>/content/...     extracted artifact
//!   platforms/<key>.lock            per-entry lock file
//!   plugins/ runtimes/ sources/     same shape
//!   tmp/<key>.<uuid>.partial/       staging, renamed into place on publish
//! ```
//!
//! An entry directory only ever appears through a rename of a fully written
//! staging directory whose marker is already in place, so readers never see
//! partial content. Staging directories that are dropped without being
//! published are removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancellationToken;
use crate::coordinate::{ArtifactCoordinate, ArtifactKind};
use crate::lock::{CacheLock, LockError, LockOptions};

/// Completion marker file name
pub const ENTRY_MARKER: &str = "entry.json";

/// Schema version for entry.json
pub const ENTRY_SCHEMA_VERSION: u32 = 1;

/// Staging directory under the cache root
pub const STAGING_DIR: &str = "tmp";

const CONTENT_DIR: &str = "content";
const DOWNLOAD_FILE: &str = "download";
const PARTIAL_SUFFIX: &str = ".partial";

/// Errors from cache store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid cache marker {}: {source}", path.display())]
    Marker {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Contents of `entry.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMarker {
    pub schema_version: u32,
    pub coordinate: ArtifactCoordinate,
    pub key: String,
    /// SHA-256 of the downloaded bytes
    pub sha256: String,
    /// Size of the downloaded bytes
    pub size: u64,
    /// Content path relative to the entry directory, `/`-separated
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A complete, validated cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub coordinate: ArtifactCoordinate,
    pub key: String,
    /// Entry directory
    pub dir: PathBuf,
    /// Extracted directory or kept jar
    pub content_path: PathBuf,
    pub marker: EntryMarker,
}

impl CacheEntry {
    fn from_marker(dir: PathBuf, marker: EntryMarker) -> Self {
        let content_path = marker
            .content
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(dir.clone(), |path, part| path.join(part));
        Self {
            coordinate: marker.coordinate.clone(),
            key: marker.key.clone(),
            dir,
            content_path,
            marker,
        }
    }
}

/// Aggregate cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Complete entries
    pub entries: usize,
    /// Sum of downloaded archive sizes
    pub download_bytes: u64,
    /// Bytes on disk under entry directories
    pub disk_bytes: u64,
    /// Staging directories currently present
    pub staging_dirs: usize,
}

/// Result of a staging sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub bytes: u64,
}

/// Machine-wide artifact cache rooted at an injected directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Visible entry directory for a coordinate.
    pub fn entry_dir(&self, coordinate: &ArtifactCoordinate) -> PathBuf {
        self.root
            .join(coordinate.kind.dir_name())
            .join(coordinate.cache_key())
    }

    /// Lock file guarding a coordinate's entry.
    pub fn lock_path(&self, coordinate: &ArtifactCoordinate) -> PathBuf {
        self.root
            .join(coordinate.kind.dir_name())
            .join(format!("{}.lock", coordinate.cache_key()))
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Look up a complete entry.
    ///
    /// A directory without a readable marker, or whose marker describes a
    /// different coordinate, is not an entry.
    pub fn lookup(&self, coordinate: &ArtifactCoordinate) -> StoreResult<Option<CacheEntry>> {
        let dir = self.entry_dir(coordinate);
        let Some(entry) = self.read_entry(&dir)? else {
            return Ok(None);
        };

        if entry.coordinate != *coordinate {
            warn!(entry = %dir.display(), %coordinate, "cache marker describes a different coordinate, ignoring");
            return Ok(None);
        }
        if !entry.content_path.exists() {
            warn!(entry = %dir.display(), "cache entry content missing, ignoring");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn read_entry(&self, dir: &Path) -> StoreResult<Option<CacheEntry>> {
        let marker_path = dir.join(ENTRY_MARKER);
        let bytes = match fs::read(&marker_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&marker_path)(e)),
        };

        match serde_json::from_slice::<EntryMarker>(&bytes) {
            Ok(marker) if marker.schema_version == ENTRY_SCHEMA_VERSION => {
                Ok(Some(CacheEntry::from_marker(dir.to_path_buf(), marker)))
            }
            Ok(marker) => {
                warn!(marker = %marker_path.display(), schema_version = marker.schema_version, "unsupported cache marker version");
                Ok(None)
            }
            Err(e) => {
                warn!(marker = %marker_path.display(), error = %e, "unreadable cache marker");
                Ok(None)
            }
        }
    }

    /// Create a fresh staging directory for `coordinate`.
    pub fn begin(&self, coordinate: &ArtifactCoordinate) -> StoreResult<Staging> {
        let staging_root = self.staging_root();
        fs::create_dir_all(&staging_root).map_err(io_error(&staging_root))?;

        let dir = staging_root.join(format!(
            "{}.{}{}",
            coordinate.cache_key(),
            uuid::Uuid::new_v4().simple(),
            PARTIAL_SUFFIX
        ));
        fs::create_dir(&dir).map_err(io_error(&dir))?;
        debug!(staging = %dir.display(), %coordinate, "staging created");

        Ok(Staging {
            dir,
            published: false,
        })
    }

    /// All complete entries, ordered by kind then key.
    pub fn list_entries(&self) -> StoreResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for kind in ArtifactKind::ALL {
            let kind_dir = self.root.join(kind.dir_name());
            let read_dir = match fs::read_dir(&kind_dir) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&kind_dir)(e)),
            };

            let mut dirs = Vec::new();
            for item in read_dir {
                let path = item.map_err(io_error(&kind_dir))?.path();
                if path.is_dir() {
                    dirs.push(path);
                }
            }
            dirs.sort();

            for dir in dirs {
                if let Some(entry) = self.read_entry(&dir)? {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    pub fn stats(&self) -> StoreResult<CacheStats> {
        let entries = self.list_entries()?;
        let mut stats = CacheStats {
            entries: entries.len(),
            ..CacheStats::default()
        };
        for entry in &entries {
            stats.download_bytes += entry.marker.size;
            stats.disk_bytes += dir_size(&entry.dir);
        }
        stats.staging_dirs = self.staging_dirs()?.len();
        Ok(stats)
    }

    fn staging_dirs(&self) -> StoreResult<Vec<PathBuf>> {
        let staging_root = self.staging_root();
        let read_dir = match fs::read_dir(&staging_root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&staging_root)(e)),
        };

        let mut dirs = Vec::new();
        for item in read_dir {
            let path = item.map_err(io_error(&staging_root))?.path();
            let is_partial = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));
            if is_partial && path.is_dir() {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }

    /// Remove staging directories with no write in the last `older_than`.
    ///
    /// Staging left behind by a killed process is never published; a
    /// directory whose newest file is younger may belong to a download in
    /// progress and is kept.
    pub fn sweep_staging(&self, older_than: Duration) -> StoreResult<SweepReport> {
        let now = SystemTime::now();
        let mut report = SweepReport::default();

        for dir in self.staging_dirs()? {
            let modified = last_write(&dir)?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < older_than {
                continue;
            }

            let size = dir_size(&dir);
            warn!(staging = %dir.display(), bytes = size, "removing abandoned staging directory");
            fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
            report.bytes += size;
            report.removed.push(dir);
        }
        Ok(report)
    }

    /// Evict one entry while holding its lock. Returns whether it existed.
    pub fn remove_entry(
        &self,
        coordinate: &ArtifactCoordinate,
        lock: &LockOptions,
        cancel: &CancellationToken,
    ) -> StoreResult<bool> {
        let _lock = CacheLock::acquire(&self.lock_path(coordinate), lock, cancel)?;
        let dir = self.entry_dir(coordinate);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(entry = %dir.display(), %coordinate, "cache entry removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir)(e)),
        }
    }
}

/// A private work directory for one download.
///
/// Removed on drop unless `publish` moved it into the cache.
#[derive(Debug)]
pub struct Staging {
    dir: PathBuf,
    published: bool,
}

impl Staging {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// File receiving the downloaded bytes.
    pub fn download_path(&self) -> PathBuf {
        self.dir.join(DOWNLOAD_FILE)
    }

    /// Directory receiving extracted content.
    pub fn content_dir(&self) -> PathBuf {
        self.dir.join(CONTENT_DIR)
    }

    /// Write the completion marker and rename the staging directory into the
    /// visible slot. The caller must hold the entry lock.
    pub fn publish(
        mut self,
        store: &CacheStore,
        coordinate: &ArtifactCoordinate,
        content_path: &Path,
        sha256: String,
        size: u64,
    ) -> StoreResult<CacheEntry> {
        let relative = content_path
            .strip_prefix(&self.dir)
            .unwrap_or(Path::new(CONTENT_DIR))
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let download = self.download_path();
        match fs::remove_file(&download) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&download)(e)),
        }

        let marker = EntryMarker {
            schema_version: ENTRY_SCHEMA_VERSION,
            coordinate: coordinate.clone(),
            key: coordinate.cache_key(),
            sha256,
            size,
            content: relative,
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&marker).map_err(|source| StoreError::Marker {
            path: self.dir.join(ENTRY_MARKER),
            source,
        })?;
        atomic_write(&self.dir, ENTRY_MARKER, &json)?;

        let target = store.entry_dir(coordinate);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        // Only an entry that failed lookup can be here; replace it.
        if target.exists() {
            warn!(entry = %target.display(), "replacing invalid cache entry");
            fs::remove_dir_all(&target).map_err(io_error(&target))?;
        }
        fs::rename(&self.dir, &target).map_err(io_error(&target))?;
        self.published = true;

        info!(%coordinate, entry = %target.display(), "cache entry published");
        Ok(CacheEntry::from_marker(target, marker))
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(staging = %self.dir.display(), "staging discarded"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(staging = %self.dir.display(), error = %e, "failed to discard staging"),
        }
    }
}

/// Write `content` to `dir/filename` via a temporary file and rename.
fn atomic_write(dir: &Path, filename: &str, content: &[u8]) -> StoreResult<()> {
    let final_path = dir.join(filename);
    let temp_path = dir.join(format!(".{}.tmp", filename));

    fs::write(&temp_path, content).map_err(io_error(&temp_path))?;
    fs::rename(&temp_path, &final_path).map_err(io_error(&final_path))?;
    Ok(())
}

/// Newest modification time of `dir` or anything below it.
fn last_write(dir: &Path) -> StoreResult<SystemTime> {
    let mut newest = fs::metadata(dir)
        .and_then(|m| m.modified())
        .map_err(io_error(dir))?;
    let entries = WalkDir::new(dir).min_depth(1).into_iter().filter_map(Result::ok);
    for modified in entries.filter_map(|e| e.metadata().ok()?.modified().ok()) {
        newest = newest.max(modified);
    }
    Ok(newest)
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::ArchiveFormat;
    use tempfile::TempDir;

    fn coordinate(id: &str) -> ArtifactCoordinate {
        ArtifactCoordinate {
            kind: ArtifactKind::Plugin,
            identifier: id.to_string(),
            version: "1.0".to_string(),
            channel: None,
            repository: "https://plugins.jetbrains.com/maven".to_string(),
            path: format!("com/jetbrains/plugins/{id}/1.0/{id}-1.0.zip"),
            format: ArchiveFormat::Zip,
            integrity: None,
        }
    }

    fn publish_dummy(store: &CacheStore, coord: &ArtifactCoordinate) -> CacheEntry {
        let staging = store.begin(coord).unwrap();
        let content = staging.content_dir().join("plugin");
        fs::create_dir_all(content.join("lib")).unwrap();
        fs::write(content.join("lib/plugin.jar"), b"jar").unwrap();
        fs::write(staging.download_path(), b"zip").unwrap();
        staging
            .publish(store, coord, &content, "ab".repeat(32), 3)
            .unwrap()
    }

    #[test]
    fn test_lookup_missing() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        assert!(store.lookup(&coordinate("a")).unwrap().is_none());
    }

    #[test]
    fn test_publish_then_lookup() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let coord = coordinate("org.example.a");

        let published = publish_dummy(&store, &coord);
        assert_eq!(published.dir, store.entry_dir(&coord));
        assert_eq!(published.marker.content, "content/plugin");
        assert!(!published.dir.join(DOWNLOAD_FILE).exists());

        let found = store.lookup(&coord).unwrap().unwrap();
        assert_eq!(found.content_path, published.content_path);
        assert!(found.content_path.join("lib/plugin.jar").is_file());
        assert!(store.staging_dirs().unwrap().is_empty());
    }

    #[test]
    fn test_dropped_staging_is_removed() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let coord = coordinate("a");

        let path = {
            let staging = store.begin(&coord).unwrap();
            fs::write(staging.download_path(), b"partial").unwrap();
            staging.path().to_path_buf()
        };

        assert!(!path.exists());
        assert!(store.lookup(&coord).unwrap().is_none());
    }

    #[test]
    fn test_directory_without_marker_is_not_an_entry() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let coord = coordinate("a");
        fs::create_dir_all(store.entry_dir(&coord).join("content")).unwrap();

        assert!(store.lookup(&coord).unwrap().is_none());
        assert!(store.list_entries().unwrap().is_empty());

        // Publishing replaces the leftover directory
        publish_dummy(&store, &coord);
        assert!(store.lookup(&coord).unwrap().is_some());
    }

    #[test]
    fn test_list_and_stats() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        publish_dummy(&store, &coordinate("b"));
        publish_dummy(&store, &coordinate("a"));
        let _open = store.begin(&coordinate("c")).unwrap();

        let entries = store.list_entries().unwrap();
        assert_eq!(entries.len(), 2);

        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.download_bytes, 6);
        assert!(stats.disk_bytes > 0);
        assert_eq!(stats.staging_dirs, 1);
    }

    #[test]
    fn test_sweep_staging_respects_age() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let staging = store.begin(&coordinate("a")).unwrap();
        let path = staging.path().to_path_buf();
        std::mem::forget(staging);

        let kept = store.sweep_staging(Duration::from_secs(3600)).unwrap();
        assert!(kept.removed.is_empty());
        assert!(path.exists());

        let swept = store.sweep_staging(Duration::ZERO).unwrap();
        assert_eq!(swept.removed, vec![path.clone()]);
        assert!(!path.exists());
    }

    #[test]
    fn test_sweep_staging_keeps_active_download() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let staging = store.begin(&coordinate("a")).unwrap();
        let path = staging.path().to_path_buf();
        std::mem::forget(staging);

        let two_hours_ago = SystemTime::now() - Duration::from_secs(7200);
        let download = path.join("a.zip");
        fs::write(&download, b"partial").unwrap();
        fs::File::open(&path).unwrap().set_modified(two_hours_ago).unwrap();

        let kept = store.sweep_staging(Duration::from_secs(3600)).unwrap();
        assert!(kept.removed.is_empty());
        assert!(download.exists());

        fs::File::options()
            .write(true)
            .open(&download)
            .unwrap()
            .set_modified(two_hours_ago)
            .unwrap();
        let swept = store.sweep_staging(Duration::from_secs(3600)).unwrap();
        assert_eq!(swept.removed, vec![path.clone()]);
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_entry() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let coord = coordinate("a");
        publish_dummy(&store, &coord);

        let cancel = CancellationToken::new();
        assert!(store.remove_entry(&coord, &LockOptions::default(), &cancel).unwrap());
        assert!(store.lookup(&coord).unwrap().is_none());
        assert!(!store.remove_entry(&coord, &LockOptions::default(), &cancel).unwrap());
    }
}
