//! Build initialization
//!
//! Runs before anything else in the pipeline. Currently this is the
//! self-update check: the latest release tag is read from the configured
//! feed and compared with the running version. The check is advisory and
//! never fails the build.

use ij_cache::Transport;
use ij_version::Version;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::BuildConfig;

/// Version of this tool
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result of the self-update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Disabled by configuration or offline mode
    Skipped,
    UpToDate,
    Outdated { current: String, latest: String },
    /// The feed could not be read or understood
    Unavailable { reason: String },
}

#[derive(Debug, Deserialize)]
struct ReleaseFeed {
    tag_name: String,
}

/// Run initialization tasks.
pub fn initialize(config: &BuildConfig, transport: &dyn Transport) -> UpdateStatus {
    if !config.self_update.check {
        debug!("self-update check disabled");
        return UpdateStatus::Skipped;
    }
    if config.fetch.offline {
        debug!("offline, skipping self-update check");
        return UpdateStatus::Skipped;
    }

    let status = check_for_update(&config.self_update.feed, CURRENT_VERSION, transport);
    match &status {
        UpdateStatus::Outdated { current, latest } => warn!(
            current = %current,
            latest = %latest,
            "a newer ij-devkit release is available"
        ),
        UpdateStatus::UpToDate => info!(version = CURRENT_VERSION, "ij-devkit is up to date"),
        UpdateStatus::Unavailable { reason } => {
            warn!(feed = %config.self_update.feed, reason = %reason, "self-update check failed")
        }
        UpdateStatus::Skipped => {}
    }
    status
}

/// Compare `current` with the latest tag published at `feed`.
pub fn check_for_update(feed: &str, current: &str, transport: &dyn Transport) -> UpdateStatus {
    let unavailable = |reason: String| UpdateStatus::Unavailable { reason };

    let body = match transport.get_text(feed) {
        Ok(body) => body,
        Err(e) => return unavailable(e.to_string()),
    };
    let release: ReleaseFeed = match serde_json::from_str(&body) {
        Ok(release) => release,
        Err(e) => return unavailable(format!("malformed release feed: {}", e)),
    };

    let tag = release.tag_name.trim();
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    let (latest, running) = match (Version::parse(tag), Version::parse(current)) {
        (Ok(latest), Ok(running)) => (latest, running),
        (Err(e), _) | (_, Err(e)) => return unavailable(e.to_string()),
    };

    if latest > running {
        UpdateStatus::Outdated {
            current: current.to_string(),
            latest: tag.to_string(),
        }
    } else {
        UpdateStatus::UpToDate
    }
}
