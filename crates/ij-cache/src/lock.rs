//! Cross-process locks for cache entries and sandboxes
//!
//! Two modes are supported:
//!
//! - `Advisory` (unix): `flock(2)` on the lock file. The kernel releases the
//!   lock when the holder exits, so a crashed build never leaves it behind.
//! - `Marker`: the lock is the existence of the lock file (`O_EXCL` create).
//!   Works on every platform and filesystem; a marker older than
//!   `stale_after` is treated as abandoned and reclaimed.
//!
//! Both modes wait up to `timeout`, log contention once, and abort early if
//! the build is cancelled. The lock file records the holder's pid, a
//! per-acquisition token and the acquisition time. A marker is only removed
//! by the holder whose token it still carries, and long holders keep it
//! fresh with [`CacheLock::refresh`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("cancelled while waiting for lock {}", path.display())]
    Cancelled { path: PathBuf },

    #[error("I/O error on lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How the lock is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `flock(2)`; unix only, falls back to `Marker` elsewhere
    Advisory,
    /// Exclusive creation of the lock file, with stale reclamation
    Marker,
}

impl Default for LockMode {
    fn default() -> Self {
        if cfg!(unix) {
            LockMode::Advisory
        } else {
            LockMode::Marker
        }
    }
}

/// Lock wait behaviour.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Maximum time to wait for the lock
    pub timeout: Duration,
    /// Age after which a marker lock is considered abandoned
    pub stale_after: Duration,
    /// Delay between acquisition attempts
    pub poll_interval: Duration,
    /// Lock implementation
    pub mode: LockMode,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            stale_after: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(50),
            mode: LockMode::default(),
        }
    }
}

/// Delay before contention is reported.
const CONTENTION_WARNING_AFTER: Duration = Duration::from_millis(500);

/// An exclusive lock, released on drop.
#[derive(Debug)]
pub struct CacheLock {
    lock_path: PathBuf,
    lock_file: Option<File>,
    mode: LockMode,
    token: String,
}

impl CacheLock {
    /// Acquire the lock at `lock_path`, creating parent directories.
    pub fn acquire(
        lock_path: &Path,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> LockResult<Self> {
        let io_err = |source| LockError::Io {
            path: lock_path.to_path_buf(),
            source,
        };

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mode = effective_mode(options.mode);
        let start = Instant::now();
        let mut warned = false;

        loop {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled {
                    path: lock_path.to_path_buf(),
                });
            }

            let attempt = match mode {
                LockMode::Advisory => try_advisory(lock_path),
                LockMode::Marker => try_marker(lock_path, options.stale_after),
            };

            match attempt {
                Ok(mut file) => {
                    if warned {
                        debug!(
                            lock = %lock_path.display(),
                            waited_secs = start.elapsed().as_secs_f64(),
                            "lock acquired after contention"
                        );
                    }
                    let token = uuid::Uuid::new_v4().simple().to_string();
                    write_holder_info(&mut file, &token).map_err(io_err)?;
                    return Ok(Self {
                        lock_path: lock_path.to_path_buf(),
                        lock_file: Some(file),
                        mode,
                        token,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > CONTENTION_WARNING_AFTER {
                        warn!(
                            lock = %lock_path.display(),
                            holder = %read_holder_info(lock_path),
                            "lock held by another build, waiting"
                        );
                        warned = true;
                    }
                }
                Err(e) => return Err(io_err(e)),
            }

            if start.elapsed() >= options.timeout {
                return Err(LockError::Timeout {
                    path: lock_path.to_path_buf(),
                    waited: options.timeout,
                });
            }

            std::thread::sleep(options.poll_interval);
        }
    }

    /// Get the lock file path.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Bump the marker's modification time so waiters do not reclaim it.
    ///
    /// No-op for advisory locks, which never go stale.
    pub fn refresh(&self) -> io::Result<()> {
        match (&self.mode, &self.lock_file) {
            (LockMode::Marker, Some(file)) => file.set_modified(SystemTime::now()),
            _ => Ok(()),
        }
    }

    /// Whether the lock file still carries this holder's token.
    pub fn is_owned(&self) -> bool {
        fs::read_to_string(&self.lock_path)
            .map(|info| holder_token(&info) == Some(self.token.as_str()))
            .unwrap_or(false)
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        match self.mode {
            LockMode::Advisory => {
                // Closing the descriptor releases the flock; the file stays
                // so other waiters keep locking the same inode.
                #[cfg(unix)]
                if let Some(file) = &self.lock_file {
                    use std::os::unix::io::AsRawFd;
                    unsafe {
                        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
                    }
                }
            }
            LockMode::Marker => {
                self.lock_file.take();
                if !self.is_owned() {
                    warn!(
                        lock = %self.lock_path.display(),
                        holder = %read_holder_info(&self.lock_path),
                        "lock marker was reclaimed by another holder, leaving it in place"
                    );
                    return;
                }
                if let Err(e) = fs::remove_file(&self.lock_path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(lock = %self.lock_path.display(), error = %e, "failed to remove lock marker");
                    }
                }
            }
        }
    }
}

fn effective_mode(requested: LockMode) -> LockMode {
    if cfg!(unix) {
        requested
    } else {
        LockMode::Marker
    }
}

#[cfg(unix)]
fn try_advisory(lock_path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(lock_path)?;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

    if result == 0 {
        Ok(file)
    } else {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        } else {
            Err(err)
        }
    }
}

#[cfg(not(unix))]
fn try_advisory(lock_path: &Path) -> io::Result<File> {
    try_marker(lock_path, Duration::MAX)
}

fn try_marker(lock_path: &Path, stale_after: Duration) -> io::Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(lock_path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if is_stale(lock_path, stale_after)? {
                warn!(
                    lock = %lock_path.display(),
                    holder = %read_holder_info(lock_path),
                    "reclaiming abandoned lock"
                );
                match fs::remove_file(lock_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                // Another waiter may win the race for the fresh marker.
                return match OpenOptions::new().write(true).create_new(true).open(lock_path) {
                    Ok(file) => Ok(file),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
                    }
                    Err(e) => Err(e),
                };
            }
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        }
        Err(e) => Err(e),
    }
}

/// Whether a lock file's last modification is older than `stale_after`.
pub fn is_stale(lock_path: &Path, stale_after: Duration) -> io::Result<bool> {
    let modified = match fs::metadata(lock_path) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    Ok(age >= stale_after)
}

fn write_holder_info(file: &mut File, token: &str) -> io::Result<()> {
    file.set_len(0)?;
    writeln!(
        file,
        "pid={}\ntoken={}\nacquired_at={}",
        std::process::id(),
        token,
        chrono::Utc::now().to_rfc3339()
    )?;
    file.flush()
}

fn holder_token(info: &str) -> Option<&str> {
    info.lines().find_map(|line| line.trim().strip_prefix("token="))
}

fn read_holder_info(lock_path: &Path) -> String {
    fs::read_to_string(lock_path)
        .map(|s| s.trim().replace('\n', " "))
        .unwrap_or_else(|_| "unknown".to_string())
}
