//! # SCORM Package Engine
//!
//! A library for downloading, extracting, caching, and launching SCORM
//! e-learning packages, with a navigation sequencer and a runtime tracking
//! shim for the content's API calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scorm_engine::{Coordinator, EngineConfig, PackageKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load().await?;
//!     let coordinator = Coordinator::new(config, None).await?;
//!
//!     // Extract (or fetch from cache) a course package
//!     let key = PackageKey::derive("course-42", "https://cdn.example.com/course-42.zip");
//!     let package = coordinator
//!         .extract("https://cdn.example.com/course-42.zip", &key)
//!         .await?;
//!
//!     println!("Extracted {} files", package.file_list.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod manifest;
pub mod navigation;
pub mod package;
pub mod progress;
pub mod protocol;
pub mod remote;
pub mod retry;
pub mod store;
pub mod tracking;

// Re-export main types
pub use cache::PackageCache;
pub use config::{CacheConfig, DownloadConfig, EngineConfig, ExtractionConfig, TrackingConfig};
pub use coordinator::Coordinator;
pub use error::{Result, ScormError};
pub use extractor::{ExtractionWorker, WorkerHandle};
pub use manifest::{Manifest, ScormVersion, parse_manifest};
pub use navigation::{NavigationItem, build_navigation_tree, is_navigation_allowed};
pub use package::{ExtractedPackage, FileBlob, PackageKey};
pub use progress::{
    ExtractionEvent, ExtractionStage, ProgressCallback, ProgressRecord, SharedCallback,
};
pub use protocol::{WorkerRequest, WorkerResponse};
pub use remote::{PackageMeta, PackageSource, TrackingBackend, TrackingRecord};
pub use store::{MemoryStore, PackageStore, SqliteStore, StorageStrategy};
pub use tracking::{DataModelChange, SessionState, TrackingSession};
