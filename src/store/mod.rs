//! Storage backends for the package cache
//!
//! Two interchangeable backends sit behind the [`PackageStore`] trait: a
//! fast ephemeral in-memory store ([`MemoryStore`]) that serves files
//! directly by path, and a durable SQLite store ([`SqliteStore`]) that
//! survives the ephemeral store being cleared and reconstructs a full
//! [`ExtractedPackage`](crate::package::ExtractedPackage) on read.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::manifest::ScormVersion;
use crate::package::{ExtractedPackage, FileBlob, PackageKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which backends a cache entry is written to.
///
/// Hybrid is the default when the memory backend is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStrategy {
    MemoryOnly,
    DurableOnly,
    Hybrid,
}

impl StorageStrategy {
    pub fn uses_memory(&self) -> bool {
        matches!(self, StorageStrategy::MemoryOnly | StorageStrategy::Hybrid)
    }

    pub fn uses_durable(&self) -> bool {
        matches!(self, StorageStrategy::DurableOnly | StorageStrategy::Hybrid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStrategy::MemoryOnly => "memory_only",
            StorageStrategy::DurableOnly => "durable_only",
            StorageStrategy::Hybrid => "hybrid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory_only" => Some(StorageStrategy::MemoryOnly),
            "durable_only" => Some(StorageStrategy::DurableOnly),
            "hybrid" => Some(StorageStrategy::Hybrid),
            _ => None,
        }
    }
}

/// Bookkeeping for one cache entry.
///
/// Metadata and the file payload are written and deleted together; an entry
/// with metadata but no payload (or vice versa) is treated as absent and
/// purged on the next read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub key: PackageKey,
    /// When the entry was written; TTL expiry is checked against this, not
    /// against `last_accessed`.
    pub timestamp: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
    pub version: ScormVersion,
    pub original_url: String,
    pub strategy: StorageStrategy,
    /// True when the payload is present in the fast backend.
    pub in_fast_backend: bool,
}

/// Common interface over the two cache backends.
///
/// `put_file` supports incremental batch writes during extraction;
/// `put_package` writes a complete package in one shot.
#[async_trait::async_trait]
pub trait PackageStore: Send + Sync {
    async fn put_package(&self, package: &ExtractedPackage) -> Result<()>;
    async fn put_file(&self, key: &PackageKey, path: &str, blob: FileBlob) -> Result<()>;
    async fn get_package(&self, key: &PackageKey) -> Result<Option<ExtractedPackage>>;
    async fn get_file(&self, key: &PackageKey, path: &str) -> Result<Option<FileBlob>>;
    async fn file_list(&self, key: &PackageKey) -> Result<Vec<String>>;
    async fn contains(&self, key: &PackageKey) -> Result<bool>;
    /// Removes the entry; returns whether anything was removed.
    async fn delete(&self, key: &PackageKey) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
}
