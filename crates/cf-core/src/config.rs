//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the database, queue, workers, result cache, retry policy,
//! object storage and external tools. Every section defaults sensibly so a
//! completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Longest lease worth configuring.
pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 7 * 86_400;

/// Longest cache TTL worth configuring.
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 86_400;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub workers: WorkerConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.queue.visibility_timeout_secs == 0 {
            warnings.push("queue.visibility_timeout_secs is 0; leases expire immediately".into());
        } else if self.queue.visibility_timeout_secs > MAX_VISIBILITY_TIMEOUT_SECS {
            warnings.push(format!(
                "queue.visibility_timeout_secs ({}) exceeds {MAX_VISIBILITY_TIMEOUT_SECS}; \
                 a crashed worker's task stays hidden that long, and leasing fails \
                 outright once the expiry is out of range",
                self.queue.visibility_timeout_secs
            ));
        }

        if self.queue.renew_interval_secs >= self.queue.visibility_timeout_secs {
            warnings.push(format!(
                "queue.renew_interval_secs ({}) should be shorter than \
                 queue.visibility_timeout_secs ({}); leases may expire between renewals",
                self.queue.renew_interval_secs, self.queue.visibility_timeout_secs
            ));
        }

        if self.workers.count == 0 {
            warnings.push("workers.count is 0; no tasks will be processed".into());
        }

        if self.cache.enabled && self.cache.ttl_secs == 0 {
            warnings.push("cache is enabled but cache.ttl_secs is 0; entries never hit".into());
        }

        if self.cache.enabled && self.cache.ttl_secs > MAX_CACHE_TTL_SECS {
            warnings.push(format!(
                "cache.ttl_secs ({}) exceeds {MAX_CACHE_TTL_SECS}; \
                 writes fail once the expiry is out of range",
                self.cache.ttl_secs
            ));
        }

        if self.database.max_connections == 0 {
            warnings.push("database.max_connections is 0; the pool cannot be built".into());
        }

        if self.retry.max_retries.is_none() {
            warnings.push(
                "retry.max_retries is not set; failed tasks can be retried forever".into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Pool size. Each worker holds a connection only briefly.
    pub max_connections: u32,
    /// How long a writer waits for another process's write lock.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("clipforge.db"),
            max_connections: 8,
            busy_timeout_ms: 5000,
        }
    }
}

/// Lease and polling behaviour of the task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a leased task stays invisible to other workers without renewal.
    pub visibility_timeout_secs: u64,
    /// How often an active worker renews its lease.
    pub renew_interval_secs: u64,
    /// Back-off between empty polls.
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 60,
            renew_interval_secs: 20,
            poll_interval_ms: 1000,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub id_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 2,
            id_prefix: "worker".into(),
        }
    }
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 86_400,
        }
    }
}

/// Retry policy applied by the retry controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of explicit retries per task. `None` means uncapped.
    pub max_retries: Option<u32>,
}

/// Local object storage root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media"),
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Upper bound on a single tool invocation.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            timeout_secs: 6 * 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.database.path, PathBuf::from("clipforge.db"));
        assert_eq!(cfg.queue.visibility_timeout_secs, 60);
        assert_eq!(cfg.queue.renew_interval_secs, 20);
        assert_eq!(cfg.workers.count, 2);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(86_400));
        assert_eq!(cfg.retry.max_retries, None);
    }

    #[test]
    fn default_config_only_warns_about_retry_cap() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1, "unexpected warnings: {:?}", warnings);
        assert!(warnings[0].contains("max_retries"));
    }

    #[test]
    fn renew_interval_longer_than_timeout_warns() {
        let mut cfg = Config::default();
        cfg.retry.max_retries = Some(3);
        cfg.queue.renew_interval_secs = 120;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("renew_interval_secs")));
    }

    #[test]
    fn oversized_durations_warn() {
        let mut cfg = Config::default();
        cfg.retry.max_retries = Some(3);
        cfg.queue.visibility_timeout_secs = 10_000_000_000_000;
        cfg.cache.ttl_secs = 10_000_000_000_000;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2, "{warnings:?}");
        assert!(warnings[0].contains("visibility_timeout_secs"));
        assert!(warnings[1].contains("cache.ttl_secs"));

        cfg.queue.visibility_timeout_secs = MAX_VISIBILITY_TIMEOUT_SECS;
        cfg.cache.ttl_secs = MAX_CACHE_TTL_SECS;
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn zero_workers_warns() {
        let mut cfg = Config::default();
        cfg.workers.count = 0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("workers.count")));
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"queue": {"visibility_timeout_secs": 300}, "retry": {"max_retries": 3}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.queue.visibility_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.queue.poll_interval_ms, 1000);
        assert_eq!(cfg.retry.max_retries, Some(3));
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.workers.id_prefix, "worker");
        assert_eq!(cfg.storage.root, PathBuf::from("media"));
    }

    #[test]
    fn parse_invalid_json_is_validation_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = Config::load_or_default(None);
        assert_eq!(cfg.workers.count, 2);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/config.json")));
        assert_eq!(cfg.workers.count, 2);
    }

    #[test]
    fn load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clipforge.json");
        std::fs::write(&path, r#"{"workers": {"count": 8}}"#).unwrap();
        let cfg = Config::load_or_default(Some(&path));
        assert_eq!(cfg.workers.count, 8);
    }
}
