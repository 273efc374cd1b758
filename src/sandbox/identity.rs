//! Composition identity
//!
//! The identity is the SHA-256 of the JCS (RFC 8785) form of every input
//! that shapes the sandbox. Local plugins and override sources are
//! fingerprinted by content; cached artifacts are immutable, so their path
//! is enough.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use ij_version::Version;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use super::composer::CompositionRequest;
use super::{io_error, ComposeError, ComposeResult};

/// Marker file holding the identity of the last composition
pub const INPUTS_MARKER: &str = ".sandbox-inputs.json";

const MARKER_SCHEMA_VERSION: u32 = 1;

/// Identity of a composition request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionIdentity {
    /// SHA-256 hex of the canonical inputs
    pub digest: String,
    pub inputs: Value,
}

impl CompositionIdentity {
    pub fn compute(request: &CompositionRequest, platform_build: &Version) -> ComposeResult<Self> {
        let mut plugins = Vec::with_capacity(request.plugins.len());
        for plugin in &request.plugins {
            let fingerprint = if plugin.immutable {
                Value::Null
            } else {
                Value::String(fingerprint(&plugin.path)?)
            };
            plugins.push(json!({
                "dependency": plugin.dependency,
                "path": plugin.path.to_string_lossy(),
                "fingerprint": fingerprint,
            }));
        }

        let mut overrides = Vec::with_capacity(request.overrides.len());
        for entry in &request.overrides {
            overrides.push(json!({
                "source": entry.source.to_string_lossy(),
                "target": entry.target.to_string_lossy(),
                "fingerprint": fingerprint(&entry.source)?,
            }));
        }

        let inputs = json!({
            "schema_version": MARKER_SCHEMA_VERSION,
            "platform": {
                "path": request.platform_dir.to_string_lossy(),
                "build": platform_build.as_str(),
            },
            "plugins": plugins,
            "overrides": overrides,
            "disabled_plugins": request.disabled_plugins,
        });

        let jcs_bytes = serde_json_canonicalizer::to_vec(&inputs)
            .map_err(|e| ComposeError::Encode(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);

        Ok(Self {
            digest: hex::encode(hasher.finalize()),
            inputs,
        })
    }
}

/// Contents of [`INPUTS_MARKER`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsMarker {
    pub schema_version: u32,
    pub identity: String,
    pub created_at: DateTime<Utc>,
    pub inputs: Value,
}

impl InputsMarker {
    pub fn new(identity: &CompositionIdentity) -> Self {
        Self {
            schema_version: MARKER_SCHEMA_VERSION,
            identity: identity.digest.clone(),
            created_at: Utc::now(),
            inputs: identity.inputs.clone(),
        }
    }

    /// Read the marker; a missing or unreadable marker is `None`.
    pub fn read(root: &Path) -> Option<Self> {
        let path = root.join(INPUTS_MARKER);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Self>(&raw) {
            Ok(marker) if marker.schema_version == MARKER_SCHEMA_VERSION => Some(marker),
            Ok(_) => None,
            Err(e) => {
                debug!(marker = %path.display(), error = %e, "ignoring unreadable sandbox marker");
                None
            }
        }
    }

    /// Write the marker via a temporary file and rename.
    pub fn write(&self, root: &Path) -> ComposeResult<()> {
        let content =
            serde_json::to_vec_pretty(self).map_err(|e| ComposeError::Encode(e.to_string()))?;
        let final_path = root.join(INPUTS_MARKER);
        let temp_path = root.join(format!(".{}.tmp", INPUTS_MARKER.trim_start_matches('.')));

        fs::write(&temp_path, content).map_err(io_error(&temp_path))?;
        fs::rename(&temp_path, &final_path).map_err(io_error(&final_path))?;
        Ok(())
    }

    pub fn remove(root: &Path) -> ComposeResult<()> {
        let path = root.join(INPUTS_MARKER);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }
}

/// Content fingerprint of a file or directory tree.
///
/// Covers relative paths and file contents in a stable order.
pub fn fingerprint(path: &Path) -> ComposeResult<String> {
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(path).to_path_buf();
            ComposeError::Io {
                path: at,
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop")),
            }
        })?;

        let relative: Vec<String> = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        hasher.update(relative.join("/").as_bytes());

        if entry.file_type().is_file() {
            hasher.update(b"\0f\0");
            let mut file = File::open(entry.path()).map_err(io_error(entry.path()))?;
            io::copy(&mut file, &mut hasher).map_err(io_error(entry.path()))?;
        } else {
            hasher.update(b"\0d\0");
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_tracks_content_and_names() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("plugin");
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join("lib/a.jar"), "one").unwrap();

        let first = fingerprint(&dir).unwrap();
        assert_eq!(first, fingerprint(&dir).unwrap());

        fs::write(dir.join("lib/a.jar"), "two").unwrap();
        let second = fingerprint(&dir).unwrap();
        assert_ne!(first, second);

        fs::rename(dir.join("lib/a.jar"), dir.join("lib/b.jar")).unwrap();
        assert_ne!(second, fingerprint(&dir).unwrap());
    }

    #[test]
    fn test_fingerprint_missing_path_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(fingerprint(&tmp.path().join("missing")).is_err());
    }

    #[test]
    fn test_marker_round_trip_and_schema_gate() {
        let tmp = TempDir::new().unwrap();
        let identity = CompositionIdentity {
            digest: "abc".to_string(),
            inputs: json!({"plugins": []}),
        };
        InputsMarker::new(&identity).write(tmp.path()).unwrap();
        assert_eq!(InputsMarker::read(tmp.path()).unwrap().identity, "abc");

        fs::write(
            tmp.path().join(INPUTS_MARKER),
            r#"{"schema_version":99,"identity":"abc","created_at":"2024-01-01T00:00:00Z","inputs":{}}"#,
        )
        .unwrap();
        assert!(InputsMarker::read(tmp.path()).is_none());

        InputsMarker::remove(tmp.path()).unwrap();
        InputsMarker::remove(tmp.path()).unwrap();
        assert!(InputsMarker::read(tmp.path()).is_none());
    }
}
