//! Artifact coordinates and cache keys
//!
//! A coordinate identifies one fetchable unit. The cache key derived from it
//! is filesystem-safe and embeds a digest of the whole coordinate, so any
//! change to repository, path, channel or declared integrity yields a new
//! cache entry instead of overwriting an existing one.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex digits of the coordinate digest kept in the cache key.
const KEY_DIGEST_LEN: usize = 16;

/// What an artifact is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Base IDE distribution
    Platform,
    /// Plugin archive or jar
    Plugin,
    /// JetBrains Runtime
    Runtime,
    /// Platform sources jar
    Sources,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Platform,
        ArtifactKind::Plugin,
        ArtifactKind::Runtime,
        ArtifactKind::Sources,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Platform => "platform",
            ArtifactKind::Plugin => "plugin",
            ArtifactKind::Runtime => "runtime",
            ArtifactKind::Sources => "sources",
        }
    }

    /// Subdirectory of the cache root holding entries of this kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Platform => "platforms",
            ArtifactKind::Plugin => "plugins",
            ArtifactKind::Runtime => "runtimes",
            ArtifactKind::Sources => "sources",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Packaging of the downloaded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    /// Zip archive, unpacked unless it turns out to be a jar
    Zip,
    /// Gzip-compressed tar archive
    TarGz,
    /// Jar kept as a single file
    Jar,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Jar => "jar",
        }
    }
}

/// Integrity data declared by the source of a coordinate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Integrity {
    /// Expected SHA-256 (lowercase hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Expected size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Integrity {
    pub fn sha256(sha256: impl Into<String>) -> Self {
        Self {
            sha256: Some(sha256.into().to_ascii_lowercase()),
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sha256.is_none() && self.size.is_none()
    }
}

/// A single fetchable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactCoordinate {
    /// Artifact kind
    pub kind: ArtifactKind,
    /// Identifier within the kind (`ideaIC`, plugin id, `jbr_jcef`)
    pub identifier: String,
    /// Concrete version (never an alias)
    pub version: String,
    /// Release channel, if not the default one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Repository base URL
    pub repository: String,
    /// Path or query relative to the repository
    pub path: String,
    /// Packaging of the download
    pub format: ArchiveFormat,
    /// Declared integrity, if the source provides it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,
}

impl ArtifactCoordinate {
    /// Full download URL.
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.repository.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }

    /// Attach declared integrity data.
    pub fn with_integrity(mut self, integrity: Integrity) -> Self {
        self.integrity = if integrity.is_empty() {
            None
        } else {
            Some(integrity)
        };
        self
    }

    /// Stable file name for the downloaded bytes.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.{}",
            sanitize(&self.identifier),
            sanitize(&self.version),
            self.format.extension()
        )
    }

    /// Filesystem-safe cache key.
    ///
    /// Format: `<identifier>-<version>-<digest>`, e.g.
    /// `ideaic-221.6008.13-3f1c0a9be2d4417c`.
    pub fn cache_key(&self) -> String {
        format!(
            "{}-{}-{}",
            sanitize(&self.identifier),
            sanitize(&self.version),
            &self.digest()[..KEY_DIGEST_LEN]
        )
    }

    /// SHA-256 over the canonical JSON form of the coordinate.
    pub fn digest(&self) -> String {
        let canonical = serde_json_canonicalizer::to_vec(self)
            .unwrap_or_else(|_| format!("{:?}", self).into_bytes());
        hex::encode(Sha256::digest(&canonical))
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.kind, self.identifier, self.version)?;
        if let Some(channel) = &self.channel {
            write!(f, "@{}", channel)?;
        }
        Ok(())
    }
}

/// Sanitize a string for use in a path component.
///
/// Keeps ASCII alphanumerics, `-` and `.`; everything else becomes `_`.
/// Lowercases for consistency across case-insensitive filesystems.
pub fn sanitize(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    // Never produce `.` or `..`
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}
