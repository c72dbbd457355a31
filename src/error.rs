//! Error types for the SCORM package engine

use thiserror::Error;

/// Main result type used throughout the SCORM engine library.
///
/// This is a convenience type alias that uses `ScormError` as the error type.
/// Most functions in this library return this result type.
pub type Result<T> = std::result::Result<T, ScormError>;

/// Main error type for the SCORM package engine.
///
/// This enum encompasses all possible errors that can occur within the library,
/// providing a unified error handling interface with automatic conversions from
/// various underlying error types.
///
/// # Example
///
/// ```rust
/// use scorm_engine::error::{ManifestError, ScormError};
///
/// // Errors automatically convert to ScormError
/// let manifest_error = ManifestError::MissingManifest;
/// let error: ScormError = manifest_error.into();
/// println!("{error}");
/// ```
#[derive(Error, Debug)]
pub enum ScormError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Errors related to configuration loading, parsing, and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {path}")]
    InvalidFile { path: std::path::PathBuf },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Errors produced while parsing or interpreting a package manifest.
///
/// `InvalidPackage` covers structural failures: a missing `imsmanifest.xml`,
/// a manifest with no resolvable entry point, or malformed required elements.
/// `UnsupportedVersion` is raised when the manifest is neither SCORM 1.2 nor
/// SCORM 2004 -- extraction fails closed on such packages.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid package: {message}")]
    InvalidPackage { message: String },

    #[error("Unsupported SCORM version: {version}")]
    UnsupportedVersion { version: String },

    #[error("Manifest parse failed: {message}")]
    ParseFailed { message: String },

    #[error("Missing imsmanifest.xml")]
    MissingManifest,

    #[error("No resolvable entry point in package")]
    NoEntryPoint,
}

/// Errors raised by the archive extraction engine.
///
/// `Timeout` carries the last stage the extraction was observed in so the
/// caller can report where the attempt stalled.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Archive decode failed: {message}")]
    DecodeFailed { message: String },

    #[error("Extraction timed out during stage: {stage}")]
    Timeout { stage: String },

    #[error("Extraction canceled")]
    Canceled,

    #[error("Extraction worker is no longer running")]
    WorkerGone,

    #[error("Extraction failed: {message}")]
    Failed { message: String },
}

/// Errors related to the two-tier package cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache quota exceeded: need {needed} bytes, quota is {quota}")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Cache entry not found: {key}")]
    EntryNotFound { key: String },

    #[error("File not found in package {key}: {path}")]
    FileNotFound { key: String, path: String },

    #[error("Cache initialization failed: {message}")]
    InitializationFailed { message: String },

    #[error("Database error: {message}")]
    DatabaseError { message: String },
}

/// Errors raised by the sequencing evaluator when a move is not allowed.
///
/// Navigation denial is recoverable: callers should fall back to the nearest
/// allowed item rather than treating the error as fatal.
#[derive(Error, Debug)]
pub enum NavigationError {
    #[error("Navigation from {from} to {to} denied: {reason}")]
    Denied {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Navigation item not found: {id}")]
    ItemNotFound { id: String },
}

/// Errors raised by the runtime tracking API shim.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Session not initialized")]
    NotInitialized,

    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Session already terminated")]
    Terminated,

    #[error("Failed to bind runtime data model after {attempts} attempts")]
    BindFailed { attempts: u32 },

    #[error("Invalid data model element: {key}")]
    InvalidElement { key: String },

    #[error("Tracking persist failed: {message}")]
    PersistFailed { message: String },
}

/// Trait for validating configuration and data structures.
///
/// # Example
///
/// ```rust
/// use scorm_engine::error::{ConfigError, Validate};
///
/// struct MyConfig {
///     url: String,
/// }
///
/// impl Validate for MyConfig {
///     type Error = ConfigError;
///
///     fn validate(&self) -> Result<(), Self::Error> {
///         if self.url.is_empty() {
///             Err(ConfigError::ValidationFailed {
///                 message: "URL cannot be empty".to_string(),
///             })
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
pub trait Validate {
    type Error;
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
