//! Two-tier package cache
//!
//! Orchestrates the fast in-memory backend and the durable SQLite backend
//! behind one interface. Reads prefer the fast backend and fall through to
//! the durable one; writes go to both (per the entry's storage strategy)
//! with metadata committed last, so a crash mid-write leaves an entry that
//! reads as absent rather than half-present.
//!
//! Eviction is least-recently-used, bounded by both an entry count and a
//! byte quota. When a new package cannot fit even after LRU eviction the
//! cache is cleared outright and the write retried once.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::package::{ExtractedPackage, FileBlob, PackageKey};
use crate::store::{CacheEntryMetadata, MemoryStore, PackageStore, SqliteStore, StorageStrategy};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Alternate directory prefixes tried when a requested path is not found
/// as-is. Authoring tools nest content one level down more often than not.
const LOOKUP_PREFIXES: &[&str] = &["scormcontent/", "content/", "res/", "scorm/"];

pub struct PackageCache {
    memory: Option<Arc<MemoryStore>>,
    durable: Arc<SqliteStore>,
    config: CacheConfig,
    quota: u64,
}

impl PackageCache {
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let quota = config.quota_bytes()?;
        let durable = Arc::new(SqliteStore::new(&config.resolved_db_path()).await?);
        let memory = config
            .memory_enabled
            .then(|| Arc::new(MemoryStore::new()));

        info!(
            max_entries = config.max_entries,
            quota_bytes = quota,
            memory_enabled = config.memory_enabled,
            "Package cache ready"
        );

        Ok(Self {
            memory,
            durable,
            config,
            quota,
        })
    }

    fn strategy(&self) -> StorageStrategy {
        if self.memory.is_some() {
            StorageStrategy::Hybrid
        } else {
            StorageStrategy::DurableOnly
        }
    }

    /// Resolves a caller-requested strategy against the backends actually
    /// available. A memory-dependent request degrades to the computed
    /// default when the fast backend is disabled.
    fn resolve_strategy(&self, requested: Option<StorageStrategy>) -> StorageStrategy {
        match requested {
            Some(strategy) if strategy.uses_memory() && self.memory.is_none() => {
                warn!(
                    requested = strategy.as_str(),
                    "Memory backend disabled, storing durably instead"
                );
                StorageStrategy::DurableOnly
            }
            Some(strategy) => strategy,
            None => self.strategy(),
        }
    }

    /// Backends in read-preference order.
    fn backends(&self) -> Vec<&dyn PackageStore> {
        self.backends_for(StorageStrategy::Hybrid)
    }

    /// Backends holding payload for an entry written under `strategy`, in
    /// read-preference order.
    fn backends_for(&self, strategy: StorageStrategy) -> Vec<&dyn PackageStore> {
        let mut backends: Vec<&dyn PackageStore> = Vec::with_capacity(2);
        if strategy.uses_memory()
            && let Some(memory) = &self.memory
        {
            backends.push(memory.as_ref());
        }
        if strategy.uses_durable() {
            backends.push(self.durable.as_ref());
        }
        backends
    }

    /// Stores a complete package, evicting older entries as needed. The
    /// strategy is chosen per write; `None` selects hybrid when the memory
    /// backend is enabled, durable-only otherwise.
    ///
    /// Metadata is written after the payload; readers treat an entry as
    /// present only once its metadata row exists.
    #[tracing::instrument(skip(self, package), fields(key = %package.key))]
    pub async fn store(
        &self,
        package: &ExtractedPackage,
        strategy: Option<StorageStrategy>,
    ) -> Result<()> {
        let needed = package.estimated_size();
        self.ensure_capacity(needed).await?;

        let strategy = self.resolve_strategy(strategy);
        if strategy.uses_memory()
            && let Some(memory) = &self.memory
        {
            memory.put_package(package).await?;
        }
        if strategy.uses_durable() {
            self.durable.put_package(package).await?;
        }

        let now = Utc::now();
        self.durable
            .upsert_metadata(&CacheEntryMetadata {
                key: package.key.clone(),
                timestamp: now,
                last_accessed: now,
                size_bytes: needed,
                version: package.version,
                original_url: package.original_url.clone(),
                strategy,
                in_fast_backend: strategy.uses_memory() && self.memory.is_some(),
            })
            .await?;

        debug!(size_bytes = needed, strategy = strategy.as_str(), "Package stored");
        Ok(())
    }

    /// Writes one extracted file into both backends without committing the
    /// entry. Used for incremental batch writes during extraction; the entry
    /// becomes visible once [`PackageCache::commit`] runs.
    pub async fn stage_file(&self, key: &PackageKey, path: &str, blob: FileBlob) -> Result<()> {
        if let Some(memory) = &self.memory {
            memory.put_file(key, path, blob.clone()).await?;
        }
        self.durable.put_file(key, path, blob).await?;
        Ok(())
    }

    /// Makes room for `needed` bytes ahead of a staged write.
    ///
    /// Callers staging files incrementally reserve capacity first so that
    /// eviction never has to race an in-progress write.
    pub async fn reserve(&self, needed: u64) -> Result<()> {
        self.ensure_capacity(needed).await
    }

    /// Commits a package whose files were already staged with
    /// [`PackageCache::stage_file`]. Writes the manifest and metadata
    /// without rewriting the staged blobs; `size_bytes` is the total staged
    /// payload size.
    pub async fn commit(&self, package: &ExtractedPackage, size_bytes: u64) -> Result<()> {
        if let Some(memory) = &self.memory {
            memory.put_package(package).await?;
        }
        self.durable.put_package(package).await?;

        let now = Utc::now();
        self.durable
            .upsert_metadata(&CacheEntryMetadata {
                key: package.key.clone(),
                timestamp: now,
                last_accessed: now,
                size_bytes,
                version: package.version,
                original_url: package.original_url.clone(),
                strategy: self.strategy(),
                in_fast_backend: self.memory.is_some(),
            })
            .await?;

        debug!(key = %package.key, size_bytes, "Staged package committed");
        Ok(())
    }

    /// Returns the package for `key`, or `None` when absent or expired.
    ///
    /// Expired entries are purged on the way out. A hit refreshes the
    /// entry's `last_accessed` time.
    pub async fn get(&self, key: &PackageKey) -> Result<Option<ExtractedPackage>> {
        let Some(meta) = self.durable.load_metadata(key).await? else {
            return Ok(None);
        };

        let age = Utc::now().signed_duration_since(meta.timestamp);
        if age.num_seconds() >= 0 && age.to_std().unwrap_or_default() >= self.config.ttl() {
            debug!(key = %key, age_secs = age.num_seconds(), "Cache entry expired, purging");
            self.invalidate(key).await?;
            return Ok(None);
        }

        for backend in self.backends_for(meta.strategy) {
            if let Some(package) = backend.get_package(key).await? {
                self.durable.touch(key).await?;
                return Ok(Some(package));
            }
        }

        // Metadata without payload in any backend: a torn write, or a
        // memory-only entry that did not survive the process. Purge.
        warn!(key = %key, "Cache metadata without payload, purging");
        self.invalidate(key).await?;
        Ok(None)
    }

    /// Whether a non-expired entry exists for `key`.
    pub async fn contains(&self, key: &PackageKey) -> Result<bool> {
        let Some(meta) = self.durable.load_metadata(key).await? else {
            return Ok(false);
        };
        let age = Utc::now().signed_duration_since(meta.timestamp);
        if age.num_seconds() >= 0 && age.to_std().unwrap_or_default() >= self.config.ttl() {
            return Ok(false);
        }
        self.durable.contains(key).await
    }

    /// Fetches one file from the package, resolving the path leniently.
    ///
    /// Resolution order: the exact path, then a case-insensitive match, then
    /// the path under each of a small set of common content directory
    /// prefixes. Returns `FileNotFound` when nothing matches.
    pub async fn get_file(&self, key: &PackageKey, path: &str) -> Result<FileBlob> {
        let normalized = path.trim_start_matches('/');

        for backend in self.backends() {
            if let Some(blob) = backend.get_file(key, normalized).await? {
                return Ok(blob);
            }
        }

        // Case-insensitive pass over the file list, then prefix fallbacks.
        let file_list = self.file_list(key).await?;
        let lowered = normalized.to_ascii_lowercase();
        let candidate = file_list
            .iter()
            .find(|entry| entry.to_ascii_lowercase() == lowered)
            .cloned()
            .or_else(|| {
                LOOKUP_PREFIXES.iter().find_map(|prefix| {
                    let prefixed = format!("{prefix}{normalized}");
                    let prefixed_lower = prefixed.to_ascii_lowercase();
                    file_list
                        .iter()
                        .find(|entry| entry.to_ascii_lowercase() == prefixed_lower)
                        .cloned()
                })
            });

        if let Some(resolved) = candidate {
            for backend in self.backends() {
                if let Some(blob) = backend.get_file(key, &resolved).await? {
                    return Ok(blob);
                }
            }
        }

        Err(CacheError::FileNotFound {
            key: key.as_str().to_string(),
            path: path.to_string(),
        }
        .into())
    }

    /// Sorted list of extracted paths for `key`.
    pub async fn file_list(&self, key: &PackageKey) -> Result<Vec<String>> {
        if let Some(memory) = &self.memory {
            let list = memory.file_list(key).await?;
            if !list.is_empty() {
                return Ok(list);
            }
        }
        self.durable.file_list(key).await
    }

    /// The file list rendered as the JSON document served at
    /// `fileList.json` inside the package namespace.
    pub async fn file_list_json(&self, key: &PackageKey) -> Result<Vec<u8>> {
        let list = self.file_list(key).await?;
        Ok(serde_json::to_vec(&list)?)
    }

    /// Cache-local URL for one file of a package.
    ///
    /// The namespace appears twice so that relative references inside the
    /// content resolve back into the same package subtree.
    pub fn resource_url(&self, key: &PackageKey, path: &str) -> String {
        let namespace = &self.config.namespace;
        let trimmed = path.trim_start_matches('/');
        format!("/{namespace}/{key}/{namespace}/{trimmed}")
    }

    /// Removes the entry for `key` from both backends. Idempotent; returns
    /// whether anything was removed.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn invalidate(&self, key: &PackageKey) -> Result<bool> {
        let mut removed = false;
        if let Some(memory) = &self.memory {
            removed |= memory.delete(key).await?;
        }
        removed |= self.durable.delete(key).await?;
        if removed {
            debug!("Cache entry invalidated");
        }
        Ok(removed)
    }

    /// Drops every entry from both backends.
    pub async fn clear(&self) -> Result<()> {
        if let Some(memory) = &self.memory {
            memory.clear().await?;
        }
        self.durable.clear().await?;
        info!("Package cache cleared");
        Ok(())
    }

    pub async fn entry_count(&self) -> Result<usize> {
        self.durable.entry_count().await
    }

    pub async fn total_size(&self) -> Result<u64> {
        self.durable.total_size().await
    }

    /// Evicts least-recently-used entries until `needed` more bytes fit
    /// under both the entry-count bound and the byte quota.
    ///
    /// When eviction alone cannot make room the whole cache is cleared and
    /// the check rerun once; a package larger than the quota itself fails
    /// with `QuotaExceeded`.
    async fn ensure_capacity(&self, needed: u64) -> Result<()> {
        if needed > self.quota {
            return Err(CacheError::QuotaExceeded {
                needed,
                quota: self.quota,
            }
            .into());
        }

        for attempt in 0..2 {
            let entries = self.durable.list_metadata().await?;
            let mut count = entries.len();
            let mut total: u64 = entries.iter().map(|meta| meta.size_bytes).sum();
            let mut evictable = entries.into_iter();

            let mut evicted = 0usize;
            while count >= self.config.max_entries || total + needed > self.quota {
                let Some(victim) = evictable.next() else {
                    break;
                };
                self.invalidate(&victim.key).await?;
                count -= 1;
                total = total.saturating_sub(victim.size_bytes);
                evicted += 1;
            }

            if evicted > 0 {
                info!(evicted, "Evicted cache entries to make room");
            }
            if count < self.config.max_entries && total + needed <= self.quota {
                return Ok(());
            }

            if attempt == 0 {
                warn!("Eviction insufficient, clearing cache and retrying");
                self.clear().await?;
            }
        }

        Err(CacheError::QuotaExceeded {
            needed,
            quota: self.quota,
        }
        .into())
    }
}
