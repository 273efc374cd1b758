//! Crate-level error type
//!
//! Every module keeps its own error enum; [`Error`] wraps them so the
//! pipeline and the CLI can propagate with `?` and classify failures with
//! [`Error::kind`].

use std::io;
use std::path::PathBuf;

use ij_cache::{FetchError, LockError, StoreError, TransportError};
use ij_version::ParseError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::descriptor::DescriptorError;
use crate::resolver::ResolveError;
use crate::sandbox::ComposeError;
use crate::verifier::VerificationError;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Version(#[from] ParseError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Configuration,
    Resolution,
    Fetch,
    Integrity,
    Composition,
    LockTimeout,
    Verification,
    Cancelled,
    Io,
}

impl ErrorKind {
    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::Parse | ErrorKind::Configuration => 2,
            ErrorKind::Resolution => 3,
            ErrorKind::Fetch => 4,
            ErrorKind::Integrity => 5,
            ErrorKind::Composition => 6,
            ErrorKind::LockTimeout => 7,
            ErrorKind::Verification => 8,
            ErrorKind::Cancelled => 130,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Version(_) => ErrorKind::Parse,
            Error::Resolve(e) => match e {
                ResolveError::UnknownPlatform(_)
                | ResolveError::Declaration(_)
                | ResolveError::Runtime { .. } => ErrorKind::Configuration,
                ResolveError::Version { .. } => ErrorKind::Parse,
                ResolveError::Alias { .. } | ResolveError::MissingBundled { .. } => {
                    ErrorKind::Resolution
                }
            },
            Error::Fetch(e) => match e {
                FetchError::Integrity { .. } => ErrorKind::Integrity,
                FetchError::LockTimeout { .. } => ErrorKind::LockTimeout,
                FetchError::Cancelled { .. } => ErrorKind::Cancelled,
                _ => ErrorKind::Fetch,
            },
            Error::Transport(_) => ErrorKind::Fetch,
            Error::Descriptor(_) => ErrorKind::Composition,
            Error::Compose(e) => match e {
                ComposeError::Lock(LockError::Timeout { .. }) => ErrorKind::LockTimeout,
                ComposeError::Lock(LockError::Cancelled { .. }) | ComposeError::Cancelled => {
                    ErrorKind::Cancelled
                }
                _ => ErrorKind::Composition,
            },
            Error::Verification(_) => ErrorKind::Verification,
            Error::Store(StoreError::Lock(LockError::Timeout { .. })) => ErrorKind::LockTimeout,
            Error::Store(_) => ErrorKind::Io,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io { .. } => ErrorKind::Io,
        }
    }
}
