//! Artifact fetcher
//!
//! `fetch` turns a coordinate into a complete cache entry:
//!
//! 1. hit check (a complete entry short-circuits all network access)
//! 2. offline check
//! 3. per-entry cross-process lock, bounded wait
//! 4. re-check, another process may have published meanwhile
//! 5. download into staging with bounded retry on transient failures
//! 6. size / sha256 validation against declared integrity or Content-Length
//! 7. extraction, marker, atomic publish
//!
//! Any failure after step 3 drops the staging directory and releases the
//! lock, so nothing partial becomes visible.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveError};
use crate::cancel::CancellationToken;
use crate::coordinate::ArtifactCoordinate;
use crate::lock::{CacheLock, LockError, LockOptions};
use crate::retry::{self, RetryError, RetryPolicy, Sleeper, ThreadSleeper};
use crate::store::{CacheEntry, CacheStore, Staging, StoreError};
use crate::transport::{DownloadInfo, Transport, TransportError};

/// Which integrity property did not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityMismatch {
    Size { expected: u64, actual: u64 },
    Sha256 { expected: String, actual: String },
}

impl fmt::Display for IntegrityMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityMismatch::Size { expected, actual } => {
                write!(f, "expected {} bytes, got {}", expected, actual)
            }
            IntegrityMismatch::Sha256 { expected, actual } => {
                write!(f, "expected sha256 {}, got {}", expected, actual)
            }
        }
    }
}

/// Errors from fetching an artifact. Every variant names the coordinate.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{coordinate} is not cached and offline mode is enabled")]
    Offline { coordinate: String },

    #[error("timed out after {waited:?} waiting for the cache lock of {coordinate}")]
    LockTimeout { coordinate: String, waited: Duration },

    #[error("downloading {coordinate} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        coordinate: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("downloading {coordinate} failed: {source}")]
    Transport {
        coordinate: String,
        #[source]
        source: TransportError,
    },

    #[error("integrity check failed for {coordinate}: {mismatch}")]
    Integrity {
        coordinate: String,
        mismatch: IntegrityMismatch,
    },

    #[error("fetch of {coordinate} cancelled")]
    Cancelled { coordinate: String },

    #[error("extracting {coordinate} failed: {source}")]
    Archive {
        coordinate: String,
        #[source]
        source: ArchiveError,
    },

    #[error("cache error for {coordinate}: {source}")]
    Store {
        coordinate: String,
        #[source]
        source: StoreError,
    },
}

impl FetchError {
    fn store(coordinate: &ArtifactCoordinate, source: StoreError) -> Self {
        FetchError::Store {
            coordinate: coordinate.to_string(),
            source,
        }
    }

    fn lock(coordinate: &ArtifactCoordinate, source: LockError) -> Self {
        match source {
            LockError::Timeout { waited, .. } => FetchError::LockTimeout {
                coordinate: coordinate.to_string(),
                waited,
            },
            LockError::Cancelled { .. } => FetchError::Cancelled {
                coordinate: coordinate.to_string(),
            },
            other => FetchError::store(coordinate, StoreError::Lock(other)),
        }
    }
}

/// Fetcher behaviour.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Never touch the network; a cache miss is an error
    pub offline: bool,
    pub lock: LockOptions,
    pub retry: RetryPolicy,
    /// Worker threads used by `fetch_all`
    pub parallelism: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            offline: false,
            lock: LockOptions::default(),
            retry: RetryPolicy::default(),
            parallelism: 4,
        }
    }
}

/// Resolves coordinates to cache entries.
pub struct Fetcher {
    store: CacheStore,
    transport: Arc<dyn Transport>,
    options: FetchOptions,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(store: CacheStore, transport: Arc<dyn Transport>, options: FetchOptions) -> Self {
        Self {
            store,
            transport,
            options,
            sleeper: Arc::new(ThreadSleeper),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the delay source used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Observe a build-level cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch one coordinate. Idempotent; safe across threads and processes.
    pub fn fetch(&self, coordinate: &ArtifactCoordinate) -> Result<CacheEntry, FetchError> {
        if let Some(entry) = self.lookup(coordinate)? {
            debug!(%coordinate, "cache hit");
            return Ok(entry);
        }

        if self.options.offline {
            return Err(FetchError::Offline {
                coordinate: coordinate.to_string(),
            });
        }
        self.check_cancelled(coordinate)?;

        let lock = CacheLock::acquire(
            &self.store.lock_path(coordinate),
            &self.options.lock,
            &self.cancel,
        )
        .map_err(|e| FetchError::lock(coordinate, e))?;

        if let Some(entry) = self.lookup(coordinate)? {
            debug!(%coordinate, "populated while waiting for lock");
            return Ok(entry);
        }

        let staging = self
            .store
            .begin(coordinate)
            .map_err(|e| FetchError::store(coordinate, e))?;

        let download = self.download(coordinate, &staging, &lock)?;
        validate(coordinate, &download)?;
        self.check_cancelled(coordinate)?;

        let content = archive::unpack(
            &staging.download_path(),
            coordinate.format,
            &staging.content_dir(),
            &coordinate.file_name(),
        )
        .map_err(|source| FetchError::Archive {
            coordinate: coordinate.to_string(),
            source,
        })?;
        self.check_cancelled(coordinate)?;

        staging
            .publish(&self.store, coordinate, &content, download.sha256, download.bytes)
            .map_err(|e| FetchError::store(coordinate, e))
    }

    /// Fetch every coordinate with bounded parallelism.
    ///
    /// Results are returned in input order. Coordinates that map to the same
    /// entry are still downloaded at most once thanks to the entry lock.
    pub fn fetch_all(
        &self,
        coordinates: &[ArtifactCoordinate],
    ) -> Vec<Result<CacheEntry, FetchError>> {
        let workers = self.options.parallelism.clamp(1, coordinates.len().max(1));
        if workers == 1 {
            return coordinates.iter().map(|c| self.fetch(c)).collect();
        }

        let next = AtomicUsize::new(0);
        let mut indexed: Vec<(usize, Result<CacheEntry, FetchError>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let index = next.fetch_add(1, Ordering::SeqCst);
                            let Some(coordinate) = coordinates.get(index) else {
                                break;
                            };
                            done.push((index, self.fetch(coordinate)));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Fetch every coordinate, stopping at the first failure in input order.
    pub fn try_fetch_all(
        &self,
        coordinates: &[ArtifactCoordinate],
    ) -> Result<Vec<CacheEntry>, FetchError> {
        self.fetch_all(coordinates).into_iter().collect()
    }

    fn lookup(&self, coordinate: &ArtifactCoordinate) -> Result<Option<CacheEntry>, FetchError> {
        self.store
            .lookup(coordinate)
            .map_err(|e| FetchError::store(coordinate, e))
    }

    fn check_cancelled(&self, coordinate: &ArtifactCoordinate) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            warn!(%coordinate, "fetch cancelled");
            return Err(FetchError::Cancelled {
                coordinate: coordinate.to_string(),
            });
        }
        Ok(())
    }

    fn download(
        &self,
        coordinate: &ArtifactCoordinate,
        staging: &Staging,
        lock: &CacheLock,
    ) -> Result<Downloaded, FetchError> {
        let url = coordinate.url();
        let path = staging.download_path();
        info!(%coordinate, url = %url, "downloading");

        let result = retry::retry(
            &self.options.retry,
            self.sleeper.as_ref(),
            &self.cancel,
            TransportError::is_transient,
            |attempt| {
                debug!(%coordinate, attempt, "download attempt");
                let file = File::create(&path).map_err(|source| TransportError::Sink {
                    url: url.clone(),
                    source,
                })?;
                let mut sink =
                    HashingWriter::new(BufWriter::new(file), &self.cancel).holding(lock);
                let info = self.transport.download(&url, &mut sink)?;
                sink.flush().map_err(|source| TransportError::Sink {
                    url: url.clone(),
                    source,
                })?;
                Ok(sink.finish(info))
            },
        );

        result.map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => FetchError::RetriesExhausted {
                coordinate: coordinate.to_string(),
                attempts,
                source: last,
            },
            RetryError::Permanent(source) => FetchError::Transport {
                coordinate: coordinate.to_string(),
                source,
            },
            RetryError::Cancelled => FetchError::Cancelled {
                coordinate: coordinate.to_string(),
            },
        })
    }
}

/// Outcome of a successful transfer.
#[derive(Debug)]
struct Downloaded {
    bytes: u64,
    sha256: String,
    content_length: Option<u64>,
}

fn validate(coordinate: &ArtifactCoordinate, download: &Downloaded) -> Result<(), FetchError> {
    let integrity = coordinate.integrity.clone().unwrap_or_default();
    let mismatch = |mismatch| {
        warn!(%coordinate, %mismatch, "integrity check failed");
        FetchError::Integrity {
            coordinate: coordinate.to_string(),
            mismatch,
        }
    };

    if let Some(expected) = integrity.size.or(download.content_length) {
        if expected != download.bytes {
            return Err(mismatch(IntegrityMismatch::Size {
                expected,
                actual: download.bytes,
            }));
        }
    }

    if let Some(expected) = &integrity.sha256 {
        if !expected.eq_ignore_ascii_case(&download.sha256) {
            return Err(mismatch(IntegrityMismatch::Sha256 {
                expected: expected.clone(),
                actual: download.sha256.clone(),
            }));
        }
    }

    Ok(())
}

/// How often a long transfer bumps its entry lock.
const LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Sink that hashes and counts bytes and aborts once cancelled.
///
/// While writing it keeps the entry lock fresh so waiters never reclaim it
/// mid-transfer.
struct HashingWriter<'a, W: Write> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
    cancel: &'a CancellationToken,
    lock: Option<&'a CacheLock>,
    refreshed_at: Instant,
}

impl<'a, W: Write> HashingWriter<'a, W> {
    fn new(inner: W, cancel: &'a CancellationToken) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
            cancel,
            lock: None,
            refreshed_at: Instant::now(),
        }
    }

    fn holding(mut self, lock: &'a CacheLock) -> Self {
        self.lock = Some(lock);
        self
    }

    fn refresh_lock(&mut self) {
        let Some(lock) = self.lock else {
            return;
        };
        if self.refreshed_at.elapsed() < LOCK_REFRESH_INTERVAL {
            return;
        }
        if let Err(e) = lock.refresh() {
            debug!(lock = %lock.path().display(), error = %e, "failed to refresh lock");
        }
        self.refreshed_at = Instant::now();
    }

    fn finish(self, info: DownloadInfo) -> Downloaded {
        Downloaded {
            bytes: self.bytes,
            sha256: hex::encode(self.hasher.finalize()),
            content_length: info.content_length,
        }
    }
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Not `Interrupted`: io::copy retries on that kind.
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "download cancelled"));
        }
        self.refresh_lock();
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
