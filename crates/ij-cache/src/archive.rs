//! Archive extraction for downloaded artifacts
//!
//! The format is sniffed from the leading bytes rather than trusted from the
//! coordinate: gzip (`1f 8b`) is a tar.gz, `PK` is a zip. A zip whose root
//! contains `META-INF/` is a jar and is stored as a single file, the way
//! plugin jars are installed. Entries that would escape the destination are
//! rejected.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::debug;

use crate::coordinate::ArchiveFormat;

/// Errors from archive extraction
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error extracting {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid zip archive {}: {message}", path.display())]
    Zip { path: PathBuf, message: String },

    #[error("archive {} contains an entry escaping the destination: {entry}", path.display())]
    UnsafeEntry { path: PathBuf, entry: String },

    #[error("unrecognized archive format for {}", path.display())]
    UnknownFormat { path: PathBuf },
}

type Result<T> = std::result::Result<T, ArchiveError>;

/// Format detected from file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    TarGz,
    Zip,
    Jar,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 2] = [b'P', b'K'];

/// Detect the format of `path` from its content.
pub fn detect(path: &Path, hint: ArchiveFormat) -> Result<DetectedFormat> {
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut magic = [0u8; 2];
    let mut file = File::open(path).map_err(io_err)?;
    let read = file.read(&mut magic).map_err(io_err)?;
    if read < 2 {
        return Err(ArchiveError::UnknownFormat {
            path: path.to_path_buf(),
        });
    }

    if magic == GZIP_MAGIC {
        return Ok(DetectedFormat::TarGz);
    }
    if magic == ZIP_MAGIC {
        if hint == ArchiveFormat::Jar || has_root_meta_inf(path)? {
            return Ok(DetectedFormat::Jar);
        }
        return Ok(DetectedFormat::Zip);
    }

    Err(ArchiveError::UnknownFormat {
        path: path.to_path_buf(),
    })
}

/// Unpack `download` into `dest` and return the content path.
///
/// A jar lands as `dest/<jar_name>`. An archive whose root holds exactly one
/// directory (the usual plugin zip and runtime tarball shape) yields that
/// directory; otherwise `dest` itself.
pub fn unpack(download: &Path, hint: ArchiveFormat, dest: &Path, jar_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dest).map_err(|source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    let format = detect(download, hint)?;
    debug!(archive = %download.display(), ?format, "unpacking");

    match format {
        DetectedFormat::Jar => {
            let target = dest.join(jar_name);
            fs::copy(download, &target).map_err(|source| ArchiveError::Io {
                path: target.clone(),
                source,
            })?;
            Ok(target)
        }
        DetectedFormat::Zip => {
            extract_zip(download, dest)?;
            single_root(dest)
        }
        DetectedFormat::TarGz => {
            extract_tar_gz(download, dest)?;
            single_root(dest)
        }
    }
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    zip::ZipArchive::new(file).map_err(|e| ArchiveError::Zip {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn has_root_meta_inf(path: &Path) -> Result<bool> {
    let archive = open_zip(path)?;
    let found = archive.file_names().any(|name| name.starts_with("META-INF/"));
    Ok(found)
}

fn extract_zip(path: &Path, dest: &Path) -> Result<()> {
    let mut archive = open_zip(path)?;
    let zip_err = |e: zip::result::ZipError| ArchiveError::Zip {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        let relative = entry.enclosed_name().ok_or_else(|| ArchiveError::UnsafeEntry {
            path: path.to_path_buf(),
            entry: entry.name().to_string(),
        })?;
        let out = dest.join(relative);
        let io_err = |source| ArchiveError::Io {
            path: out.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = File::create(&out).map_err(io_err)?;
        io::copy(&mut entry, &mut file).map_err(io_err)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777)).map_err(io_err)?;
        }
    }
    Ok(())
}

fn extract_tar_gz(path: &Path, dest: &Path) -> Result<()> {
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let name = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        // unpack_in refuses entries with `..` or absolute paths
        if !entry.unpack_in(dest).map_err(io_err)? {
            return Err(ArchiveError::UnsafeEntry {
                path: path.to_path_buf(),
                entry: name,
            });
        }
    }
    Ok(())
}

fn single_root(dest: &Path) -> Result<PathBuf> {
    let io_err = |source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    };
    let mut children = Vec::new();
    for entry in fs::read_dir(dest).map_err(io_err)? {
        children.push(entry.map_err(io_err)?.path());
        if children.len() > 1 {
            return Ok(dest.to_path_buf());
        }
    }
    match children.pop() {
        Some(only) if only.is_dir() => Ok(only),
        _ => Ok(dest.to_path_buf()),
    }
}
