//! Sandbox composition
//!
//! A sandbox is the isolated directory tree an IDE instance runs against
//! during plugin tests:
//!
//! ```text
//! <root>/
//!   idea.properties          platform defaults + sandbox paths
//!   config/                  IDE configuration (disabled_plugins.txt)
//!   plugins/                 bundled plugins (linked) + explicit plugins
//!   system/                  caches and indexes
//!   log/
//!   .sandbox-inputs.json     identity marker, written last
//! ```
//!
//! Composition is skipped when the identity of the inputs matches the
//! marker left by the previous run. The sandbox is guarded by an exclusive
//! lock on `<root>.lock` for as long as the [`ComposedSandbox`] lives.

mod composer;
mod identity;
mod layout;

use std::io;
use std::path::PathBuf;

use ij_cache::LockError;
use thiserror::Error;

use crate::descriptor::DescriptorError;

pub use composer::{
    ComposedSandbox, CompositionRequest, PluginSource, SandboxComposer, DISABLED_PLUGINS_FILE,
};
pub use identity::{fingerprint, CompositionIdentity, InputsMarker, INPUTS_MARKER};
pub use layout::SandboxLayout;

/// Composition errors
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("{dependency}: path does not exist: {}", path.display())]
    MissingPath { dependency: String, path: PathBuf },

    #[error("{dependency}: not a recognizable plugin at {}: {reason}", path.display())]
    UnrecognizedPlugin {
        dependency: String,
        path: PathBuf,
        reason: String,
    },

    #[error("override target '{}' must be a relative path inside the sandbox", target.display())]
    InvalidOverride { target: PathBuf },

    #[error("cannot determine platform build: {0}")]
    PlatformBuild(#[source] DescriptorError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("sandbox composition cancelled")]
    Cancelled,

    #[error("cannot unpack {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ij_cache::ArchiveError,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot encode sandbox inputs: {0}")]
    Encode(String),
}

/// Result type for composition
pub type ComposeResult<T> = Result<T, ComposeError>;

fn io_error(path: &std::path::Path) -> impl FnOnce(io::Error) -> ComposeError + '_ {
    move |source| ComposeError::Io {
        path: path.to_path_buf(),
        source,
    }
}
