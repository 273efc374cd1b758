//! Machine-wide artifact cache for IntelliJ platform builds.
//!
//! Resolves [`ArtifactCoordinate`]s to validated local paths. Several build
//! processes may share one cache root: every entry is guarded by a
//! cross-process lock, downloads land in a private staging directory and are
//! published with an atomic rename only after size and checksum validation.

pub mod archive;
pub mod cancel;
pub mod coordinate;
pub mod fetcher;
pub mod lock;
pub mod retry;
pub mod store;
pub mod transport;

pub use archive::ArchiveError;
pub use cancel::CancellationToken;
pub use coordinate::{sanitize, ArchiveFormat, ArtifactCoordinate, ArtifactKind, Integrity};
pub use fetcher::{FetchError, FetchOptions, Fetcher, IntegrityMismatch};
pub use lock::{CacheLock, LockError, LockMode, LockOptions};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use store::{CacheEntry, CacheStats, CacheStore, EntryMarker, StoreError, SweepReport};
pub use transport::{DownloadInfo, HttpTransport, Transport, TransportError};
