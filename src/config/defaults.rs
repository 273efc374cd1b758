//! Built-in defaults (layer 1)
//!
//! Every key a build may set has a value here, so the merged document always
//! deserializes into a complete [`BuildConfig`](super::BuildConfig).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Platform type code (default: "IC")
    pub platform_type: String,

    /// Platform version or alias (default: "latest")
    pub platform_version: String,

    /// Release catalog used for aliases (default: "jetbrains")
    pub catalog_mode: String,

    /// Seconds to wait for a cache or sandbox lock (default: 300)
    pub lock_timeout_seconds: u64,

    /// Age after which a marker lock is reclaimed (default: 3600)
    pub stale_lock_seconds: u64,

    /// Total download attempts per artifact (default: 3)
    pub max_attempts: u64,

    /// First retry delay in milliseconds (default: 500)
    pub initial_backoff_ms: u64,

    /// Largest retry delay in milliseconds (default: 8000)
    pub max_backoff_ms: u64,

    /// Parallel downloads (default: 4)
    pub parallelism: u64,

    /// Connect timeout in seconds (default: 30)
    pub connect_timeout_seconds: u64,

    /// Whole-request timeout in seconds (default: 1800)
    pub request_timeout_seconds: u64,

    /// Sandbox directory relative to the project (default: "build/idea-sandbox")
    pub sandbox_dir: String,

    /// Release feed checked by the self-update check
    pub self_update_feed: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            platform_type: "IC".to_string(),
            platform_version: "latest".to_string(),
            catalog_mode: "jetbrains".to_string(),
            lock_timeout_seconds: 300,
            stale_lock_seconds: 3600,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            parallelism: 4,
            connect_timeout_seconds: 30,
            request_timeout_seconds: 1800,
            sandbox_dir: "build/idea-sandbox".to_string(),
            self_update_feed: "https://api.github.com/repos/ij-devkit/ij-devkit/releases/latest"
                .to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> Value {
        json!({
            "platform": {
                "type": self.platform_type,
                "version": self.platform_version,
                "download_sources": false
            },
            "runtime": {
                "enabled": false,
                "variant": "jcef",
                "repository": "https://cache-redirector.jetbrains.com/intellij-jbr"
            },
            "plugins": [],
            "repositories": [],
            "catalog": {
                "mode": self.catalog_mode,
                "platforms": {},
                "plugins": {}
            },
            "cache": {
                "lock_timeout_seconds": self.lock_timeout_seconds,
                "stale_lock_seconds": self.stale_lock_seconds,
                "lock_mode": "auto"
            },
            "fetch": {
                "offline": false,
                "max_attempts": self.max_attempts,
                "initial_backoff_ms": self.initial_backoff_ms,
                "max_backoff_ms": self.max_backoff_ms,
                "parallelism": self.parallelism,
                "connect_timeout_seconds": self.connect_timeout_seconds,
                "request_timeout_seconds": self.request_timeout_seconds
            },
            "sandbox": {
                "dir": self.sandbox_dir,
                "keep": true,
                "overrides": [],
                "disabled_plugins": []
            },
            "self_update": {
                "check": true,
                "feed": self.self_update_feed
            }
        })
    }
}
