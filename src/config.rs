//! File configuration.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. a `--config <path>` CLI flag)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! Every field has a default, so an empty file is a valid config. The
//! sections convert into the programmatic configs ([`JobManagerConfig`],
//! [`CacheConfig`]) used by the library.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{
    CacheBackend, CacheConfig, ContentCacheManager, DEFAULT_CACHE_VERSION, MemoryCacheBackend,
    MokaCacheBackend,
};
use crate::jobs::{
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS, JobManager, JobManagerConfig, JobPriority,
};
use crate::retry::RetryConfig;
use crate::{HuginnError, Result};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub cache: CacheSection,
}

/// `[jobs]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Number of worker loops to start (default: 4).
    pub workers: usize,
    /// Idle poll interval in milliseconds (default: 500).
    pub poll_interval_ms: u64,
    /// Shutdown grace period in seconds (default: 30).
    pub shutdown_grace_secs: u64,
    /// Handler timeout for jobs submitted without one (default: 300).
    pub default_timeout_seconds: u64,
    /// Retry budget for jobs submitted without one (default: 3).
    pub default_max_retries: u32,
    /// `low`, `normal`, `high` or `urgent` (default: `normal`).
    pub default_priority: JobPriority,
    /// `[jobs.storage_retry]`: backoff for transient queue errors.
    pub storage_retry: RetryConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 500,
            shutdown_grace_secs: 30,
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            default_max_retries: DEFAULT_MAX_RETRIES,
            default_priority: JobPriority::Normal,
            storage_retry: RetryConfig::default(),
        }
    }
}

impl JobsConfig {
    pub fn manager_config(&self) -> JobManagerConfig {
        JobManagerConfig::new()
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .shutdown_grace(Duration::from_secs(self.shutdown_grace_secs))
            .default_timeout_seconds(self.default_timeout_seconds)
            .default_max_retries(self.default_max_retries)
            .default_priority(self.default_priority)
            .storage_retry(self.storage_retry.clone())
    }

    /// A manager over an in-memory queue configured from this section.
    pub fn build_manager(&self) -> Result<JobManager> {
        JobManager::builder()
            .config(self.manager_config())
            .build()
    }
}

/// Which [`CacheBackend`] to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Exact oldest-first eviction.
    #[default]
    Memory,
    /// moka TinyLFU cache.
    Moka,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub backend: CacheBackendKind,
    /// Maximum number of entries (default: 1000).
    pub max_entries: u64,
    /// Default TTL in seconds; 0 never expires (default: 86400).
    pub ttl_secs: u64,
    /// Key schema version (default: "v1").
    pub version: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            max_entries: 1_000,
            ttl_secs: 86_400,
            version: DEFAULT_CACHE_VERSION.to_string(),
        }
    }
}

impl CacheSection {
    pub fn cache_config(&self) -> CacheConfig {
        let ttl = (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs));
        CacheConfig::new()
            .max_entries(self.max_entries)
            .ttl(ttl)
            .version(self.version.clone())
    }

    pub fn build_backend(&self) -> Arc<dyn CacheBackend> {
        match self.backend {
            CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new(self.max_entries)),
            CacheBackendKind::Moka => Arc::new(MokaCacheBackend::new(self.max_entries)),
        }
    }

    pub fn build_manager(&self) -> ContentCacheManager {
        ContentCacheManager::new(self.build_backend(), self.cache_config())
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.huginn/config.toml`
    /// 3. `/etc/huginn/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::find_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Err(HuginnError::Configuration(
                "No config file found. Create ~/.huginn/config.toml or /etc/huginn/config.toml"
                    .to_string(),
            )),
        }
    }

    /// Like [`load`](Self::load), but falls back to defaults when no
    /// file exists in the standard locations. A missing explicit path is
    /// still an error.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::find_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HuginnError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            HuginnError::Configuration(msg) => {
                HuginnError::Configuration(format!("{msg} (in {path:?})"))
            }
            other => other,
        })
    }

    fn find_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/huginn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    fn validate(&self) -> Result<()> {
        if self.jobs.workers == 0 {
            return Err(HuginnError::Configuration(
                "jobs.workers must be at least 1".into(),
            ));
        }
        if self.jobs.poll_interval_ms == 0 {
            return Err(HuginnError::Configuration(
                "jobs.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.jobs.default_timeout_seconds == 0 {
            return Err(HuginnError::Configuration(
                "jobs.default_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(HuginnError::Configuration(
                "cache.max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.jobs.workers, 4);
        assert_eq!(config.cache.cache_config(), CacheConfig::default());
        assert_eq!(config.jobs.manager_config(), JobManagerConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [jobs]
            workers = 8
            poll_interval_ms = 50
            default_priority = "high"
            default_max_retries = 1

            [jobs.storage_retry]
            max_attempts = 3
            initial_delay_ms = 10

            [cache]
            backend = "moka"
            max_entries = 64
            ttl_secs = 0
            version = "v3"
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.jobs.workers, 8);
        assert_eq!(config.jobs.default_priority, JobPriority::High);

        let manager = config.jobs.manager_config();
        assert_eq!(manager.poll_interval, Duration::from_millis(50));
        assert_eq!(manager.default_max_retries, 1);
        assert_eq!(manager.storage_retry.max_attempts, 3);
        assert_eq!(manager.storage_retry.initial_delay, Duration::from_millis(10));
        // Unset nested fields keep their defaults.
        assert_eq!(manager.storage_retry.max_delay, Duration::from_secs(5));

        assert_eq!(config.cache.backend, CacheBackendKind::Moka);
        let cache = config.cache.cache_config();
        assert_eq!(cache.ttl, None);
        assert_eq!(cache.version, "v3");
        assert_eq!(config.cache.build_backend().name(), "moka");
    }

    #[test]
    fn invalid_values_rejected() {
        for toml in [
            "[jobs]\nworkers = 0",
            "[jobs]\npoll_interval_ms = 0",
            "[cache]\nmax_entries = 0",
            "[cache]\nbackend = \"redis\"",
        ] {
            assert!(
                matches!(
                    Config::from_toml_str(toml),
                    Err(HuginnError::Configuration(_))
                ),
                "accepted: {toml}"
            );
        }
    }
}
