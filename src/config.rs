//! Configuration management for the SCORM package engine

use crate::error::{ConfigError, Result, Validate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the SCORM engine.
///
/// Holds all settings for the package cache, archive downloads, the
/// extraction worker, and the runtime tracking shim.
///
/// # Example
///
/// ```rust,no_run
/// use scorm_engine::config::EngineConfig;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = EngineConfig::load().await?;
/// println!("Cache dir: {}", config.cache.cache_dir.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Configuration for the two-tier package cache.
///
/// `max_size` accepts human-readable sizes such as `"500MB"` or `"1GB"`.
/// Entries older than `ttl_days` are treated as absent on read and purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    /// Explicit database location. Empty means `packages.db` under
    /// `cache_dir`; see [`CacheConfig::resolved_db_path`].
    #[serde(default)]
    pub db_path: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
    #[serde(default = "default_max_size")]
    pub max_size: String,
    #[serde(default = "default_memory_enabled")]
    pub memory_enabled: bool,
}

/// Configuration for archive downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

/// Configuration for the extraction worker.
///
/// The three threshold pairs drive progress throttling at the engine,
/// display, and logging layers respectively. A progress message passes a
/// layer when the delta since the last emitted value reaches the threshold
/// or the interval has elapsed; terminal messages always pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_extract_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_progress_min_delta")]
    pub progress_min_delta: f64,
    #[serde(default = "default_progress_min_interval_ms")]
    pub progress_min_interval_ms: u64,
    #[serde(default = "default_display_min_delta")]
    pub display_min_delta: f64,
    #[serde(default = "default_log_min_delta")]
    pub log_min_delta: f64,
    #[serde(default = "default_log_min_interval_ms")]
    pub log_min_interval_ms: u64,
}

/// Configuration for the runtime tracking shim.
///
/// `auto_commit_secs = 0` disables the recurring auto-commit timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default)]
    pub auto_commit_secs: u64,
    #[serde(default = "default_bind_attempts")]
    pub bind_attempts: u32,
    #[serde(default = "default_bind_delay_ms")]
    pub bind_delay_ms: u64,
    #[serde(default = "default_persist_retry_attempts")]
    pub persist_retry_attempts: u32,
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
}

fn default_namespace() -> String {
    "scorm-cache".to_string()
}

fn default_max_entries() -> usize {
    10
}

fn default_ttl_days() -> u32 {
    7
}

fn default_max_size() -> String {
    "500MB".to_string()
}

fn default_memory_enabled() -> bool {
    true
}

fn default_download_timeout() -> u64 {
    120
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_batch_size() -> usize {
    20
}

fn default_extract_timeout() -> u64 {
    300
}

fn default_progress_min_delta() -> f64 {
    0.01
}

fn default_progress_min_interval_ms() -> u64 {
    250
}

fn default_display_min_delta() -> f64 {
    0.02
}

fn default_log_min_delta() -> f64 {
    0.05
}

fn default_log_min_interval_ms() -> u64 {
    1000
}

fn default_bind_attempts() -> u32 {
    3
}

fn default_bind_delay_ms() -> u64 {
    2000
}

fn default_persist_retry_attempts() -> u32 {
    3
}

fn default_persist_backoff_ms() -> u64 {
    500
}

impl Default for CacheConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let base = home_dir.join(".scorm-engine");
        Self {
            cache_dir: base.join("cache"),
            db_path: PathBuf::new(),
            namespace: default_namespace(),
            max_entries: default_max_entries(),
            ttl_days: default_ttl_days(),
            max_size: default_max_size(),
            memory_enabled: default_memory_enabled(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            timeout_secs: default_extract_timeout(),
            progress_min_delta: default_progress_min_delta(),
            progress_min_interval_ms: default_progress_min_interval_ms(),
            display_min_delta: default_display_min_delta(),
            log_min_delta: default_log_min_delta(),
            log_min_interval_ms: default_log_min_interval_ms(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            auto_commit_secs: 0,
            bind_attempts: default_bind_attempts(),
            bind_delay_ms: default_bind_delay_ms(),
            persist_retry_attempts: default_persist_retry_attempts(),
            persist_backoff_ms: default_persist_backoff_ms(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the default location (`scorm-engine.toml` in
    /// the current directory), falling back to defaults when no file exists.
    pub async fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific TOML file.
    ///
    /// The configuration is validated after loading.
    pub async fn from_file(path: &std::path::Path) -> Result<Self> {
        let path_clone = path.to_path_buf();
        let content = tokio::task::spawn_blocking(move || {
            std::fs::read_to_string(&path_clone)
                .map_err(|_| ConfigError::InvalidFile { path: path_clone })
        })
        .await
        .map_err(|e| ConfigError::ValidationFailed {
            message: format!("config read task failed: {e}"),
        })??;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("scorm-engine.toml")
    }
}

impl CacheConfig {
    /// Returns the cache TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_days) * 24 * 60 * 60)
    }

    /// Returns the database file path, defaulting to `packages.db` inside
    /// `cache_dir` when `db_path` is not set.
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.as_os_str().is_empty() {
            self.cache_dir.join("packages.db")
        } else {
            self.db_path.clone()
        }
    }

    /// Returns the size quota in bytes, parsed from `max_size`.
    pub fn quota_bytes(&self) -> Result<u64> {
        parse_size(&self.max_size).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "cache.max_size".to_string(),
                value: self.max_size.clone(),
            }
            .into()
        })
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parses a human-readable size string (`"100MB"`, `"1GB"`, `"4096"`) into
/// bytes. Returns `None` for unrecognized input.
pub fn parse_size(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (number, multiplier) = if let Some(stripped) = upper.strip_suffix("GB") {
        (stripped, 1024 * 1024 * 1024)
    } else if let Some(stripped) = upper.strip_suffix("MB") {
        (stripped, 1024 * 1024)
    } else if let Some(stripped) = upper.strip_suffix("KB") {
        (stripped, 1024)
    } else if let Some(stripped) = upper.strip_suffix('B') {
        (stripped, 1)
    } else {
        (upper.as_str(), 1)
    };

    let value: f64 = number.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64) as u64)
}

impl Validate for EngineConfig {
    type Error = ConfigError;

    fn validate(&self) -> std::result::Result<(), Self::Error> {
        self.cache.validate()?;

        if self.extraction.batch_size == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "extraction.batch_size must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.extraction.progress_min_delta) {
            return Err(ConfigError::InvalidValue {
                key: "extraction.progress_min_delta".to_string(),
                value: self.extraction.progress_min_delta.to_string(),
            });
        }
        if self.tracking.bind_attempts == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "tracking.bind_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Validate for CacheConfig {
    type Error = ConfigError;

    fn validate(&self) -> std::result::Result<(), Self::Error> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed {
                message: "cache.cache_dir cannot be empty".to_string(),
            });
        }
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(ConfigError::InvalidValue {
                key: "cache.namespace".to_string(),
                value: self.namespace.clone(),
            });
        }
        if self.max_entries == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "cache.max_entries must be at least 1".to_string(),
            });
        }
        if parse_size(&self.max_size).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "cache.max_size".to_string(),
                value: self.max_size.clone(),
            });
        }
        Ok(())
    }
}
