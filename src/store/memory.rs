//! Fast ephemeral in-memory backend
//!
//! Serves files directly by path to the rendering surface without a round
//! trip through the caller. Contents do not survive the process; the
//! durable backend is responsible for reconstruction.

use super::PackageStore;
use crate::error::Result;
use crate::manifest::{Manifest, ScormVersion};
use crate::package::{ExtractedPackage, FileBlob, PackageKey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;

#[derive(Default)]
struct MemoryEntry {
    manifest: Option<Manifest>,
    original_url: String,
    version: Option<ScormVersion>,
    extracted_at: Option<DateTime<Utc>>,
    files: HashMap<String, FileBlob>,
}

/// In-memory package store backed by a concurrent map.
///
/// Writes to different keys never block each other; files staged with
/// [`PackageStore::put_file`] become a complete entry once
/// [`PackageStore::put_package`] (or the cache's commit) fills in the
/// manifest.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<PackageKey, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held for `key`, zero when absent.
    pub fn entry_size(&self, key: &PackageKey) -> u64 {
        self.entries
            .get(key)
            .map(|entry| entry.files.values().map(|blob| blob.len() as u64).sum())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Synchronous presence check used on the coordinator's hot path.
    pub fn contains_key(&self, key: &PackageKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.manifest.is_some())
    }
}

#[async_trait::async_trait]
impl PackageStore for MemoryStore {
    async fn put_package(&self, package: &ExtractedPackage) -> Result<()> {
        let mut entry = self.entries.entry(package.key.clone()).or_default();
        entry.manifest = Some(package.manifest.clone());
        entry.original_url = package.original_url.clone();
        entry.version = Some(package.version);
        entry.extracted_at = Some(package.extracted_at);
        for (path, blob) in &package.files {
            entry.files.insert(path.clone(), blob.clone());
        }
        Ok(())
    }

    async fn put_file(&self, key: &PackageKey, path: &str, blob: FileBlob) -> Result<()> {
        self.entries
            .entry(key.clone())
            .or_default()
            .files
            .insert(path.to_string(), blob);
        Ok(())
    }

    /// Returns a lightweight package whose `files` map is empty: callers
    /// fetch individual files by path instead of holding every blob.
    async fn get_package(&self, key: &PackageKey) -> Result<Option<ExtractedPackage>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        let Some(manifest) = entry.manifest.clone() else {
            // Staged files without a committed manifest are not a package.
            return Ok(None);
        };

        let mut file_list: Vec<String> = entry.files.keys().cloned().collect();
        file_list.sort();

        Ok(Some(ExtractedPackage {
            key: key.clone(),
            version: entry.version.unwrap_or(manifest.version),
            manifest,
            files: HashMap::new(),
            file_list,
            original_url: entry.original_url.clone(),
            extracted_at: entry.extracted_at.unwrap_or_else(Utc::now),
        }))
    }

    async fn get_file(&self, key: &PackageKey, path: &str) -> Result<Option<FileBlob>> {
        Ok(self
            .entries
            .get(key)
            .and_then(|entry| entry.files.get(path).cloned()))
    }

    async fn file_list(&self, key: &PackageKey) -> Result<Vec<String>> {
        let mut list: Vec<String> = self
            .entries
            .get(key)
            .map(|entry| entry.files.keys().cloned().collect())
            .unwrap_or_default();
        list.sort();
        Ok(list)
    }

    async fn contains(&self, key: &PackageKey) -> Result<bool> {
        Ok(self.contains_key(key))
    }

    async fn delete(&self, key: &PackageKey) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}
