//! Test helper functions and utilities

use scorm_engine::config::{
    CacheConfig, DownloadConfig, EngineConfig, ExtractionConfig, TrackingConfig,
};
use std::path::Path;
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Installs the test tracing subscriber once per process. Quiet by default;
/// set `RUST_LOG` to see engine output while debugging a failing test.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Creates an engine configuration rooted in a temp directory, with short
/// timeouts and tight throttles so tests run quickly.
pub fn create_test_config(temp_dir: &Path) -> EngineConfig {
    EngineConfig {
        cache: CacheConfig {
            cache_dir: temp_dir.join("cache"),
            db_path: temp_dir.join("packages.db"),
            ..CacheConfig::default()
        },
        download: DownloadConfig {
            timeout_secs: 10,
            retry_attempts: 3,
        },
        extraction: ExtractionConfig {
            timeout_secs: 10,
            ..ExtractionConfig::default()
        },
        tracking: TrackingConfig {
            bind_delay_ms: 1,
            persist_backoff_ms: 1,
            ..TrackingConfig::default()
        },
    }
}

/// Creates the temp directory a test engine works out of and makes sure
/// test logging is installed.
pub fn setup_test_env() -> TempDir {
    init_test_logging();
    TempDir::new().expect("Failed to create temp directory")
}
