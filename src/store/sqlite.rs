//! SQLite-backed durable package store
//!
//! Uses a deadpool-backed SQLite connection pool to provide async access
//! without blocking the Tokio runtime. Survives process restarts and the
//! ephemeral store being cleared; packages are reconstructed from the
//! `packages` and `package_files` tables on read.

use super::{CacheEntryMetadata, PackageStore, StorageStrategy};
use crate::error::{CacheError, Result, ScormError};
use crate::manifest::{Manifest, ScormVersion};
use crate::package::{ExtractedPackage, FileBlob, PackageKey};
use chrono::{DateTime, Utc};
use deadpool_sqlite::rusqlite::{self, OptionalExtension};
use deadpool_sqlite::{Config as DeadpoolConfig, Pool, Runtime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

pub struct SqliteStore {
    pool: Pool,
    db_path: PathBuf,
}

impl SqliteStore {
    fn configure_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;
        Ok(())
    }

    async fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            ScormError::Cache(CacheError::DatabaseError {
                message: format!("Failed to acquire SQLite connection: {e}"),
            })
        })?;

        let result = conn
            .interact(move |conn| {
                Self::configure_connection(conn)?;
                f(conn)
            })
            .await
            .map_err(|e| {
                ScormError::Cache(CacheError::DatabaseError {
                    message: format!("SQLite connection worker failed: {e}"),
                })
            })?;

        result.map_err(|e| {
            ScormError::Cache(CacheError::DatabaseError {
                message: e.to_string(),
            })
        })
    }

    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = DeadpoolConfig::new(db_path.to_path_buf())
            .builder(Runtime::Tokio1)
            .map_err(|e| {
                ScormError::Cache(CacheError::InitializationFailed {
                    message: format!("Failed to create SQLite pool builder: {e}"),
                })
            })?
            .max_size(4)
            .wait_timeout(Some(std::time::Duration::from_secs(30)))
            .create_timeout(Some(std::time::Duration::from_secs(30)))
            .build()
            .map_err(|e| {
                ScormError::Cache(CacheError::InitializationFailed {
                    message: format!("Failed to create SQLite pool: {e}"),
                })
            })?;

        let store = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        store.init_schema().await?;
        info!("Package database initialized at {:?}", store.db_path);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.with_connection(move |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS packages (
                    key TEXT PRIMARY KEY,
                    manifest_json TEXT,
                    original_url TEXT NOT NULL,
                    version TEXT NOT NULL,
                    extracted_at TEXT NOT NULL,
                    last_accessed TEXT NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    strategy TEXT NOT NULL,
                    in_memory INTEGER NOT NULL,
                    has_payload INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS package_files (
                    key TEXT NOT NULL,
                    path TEXT NOT NULL,
                    mime TEXT NOT NULL,
                    data BLOB NOT NULL,
                    PRIMARY KEY (key, path),
                    FOREIGN KEY(key) REFERENCES packages(key) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_packages_last_accessed
                    ON packages(last_accessed);
                "#,
            )?;

            conn.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                rusqlite::params!["schema_version", SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        })
        .await?;

        debug!("Package database schema ready (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Inserts or replaces the metadata row for one entry and marks the
    /// entry committed.
    ///
    /// File payloads go through [`PackageStore::put_file`] or
    /// [`PackageStore::put_package`]; metadata is written last so readers
    /// only ever see complete entries.
    pub async fn upsert_metadata(&self, meta: &CacheEntryMetadata) -> Result<()> {
        let key = meta.key.as_str().to_string();
        let manifest_json: Option<String> = None;
        let original_url = meta.original_url.clone();
        let version = version_to_str(meta.version).to_string();
        let extracted_at = meta.timestamp.to_rfc3339();
        let last_accessed = meta.last_accessed.to_rfc3339();
        let size_bytes = meta.size_bytes as i64;
        let strategy = meta.strategy.as_str().to_string();
        let in_memory = meta.in_fast_backend as i64;

        self.with_connection(move |conn| {
            conn.execute(
                r#"
                INSERT INTO packages
                    (key, manifest_json, original_url, version, extracted_at,
                     last_accessed, size_bytes, strategy, in_memory, has_payload)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)
                ON CONFLICT(key) DO UPDATE SET
                    original_url = excluded.original_url,
                    version = excluded.version,
                    extracted_at = excluded.extracted_at,
                    last_accessed = excluded.last_accessed,
                    size_bytes = excluded.size_bytes,
                    strategy = excluded.strategy,
                    in_memory = excluded.in_memory,
                    has_payload = 1
                "#,
                rusqlite::params![
                    key,
                    manifest_json,
                    original_url,
                    version,
                    extracted_at,
                    last_accessed,
                    size_bytes,
                    strategy,
                    in_memory
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Loads the metadata row for `key`, or `None` when absent.
    pub async fn load_metadata(&self, key: &PackageKey) -> Result<Option<CacheEntryMetadata>> {
        let key_str = key.as_str().to_string();
        let row = self
            .with_connection(move |conn| {
                conn.query_row(
                    r#"
                    SELECT original_url, version, extracted_at, last_accessed,
                           size_bytes, strategy, in_memory
                    FROM packages WHERE key = ?1 AND has_payload = 1
                    "#,
                    rusqlite::params![key_str],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, i64>(6)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;

        Ok(row.map(|(url, version, extracted, accessed, size, strategy, in_memory)| {
            CacheEntryMetadata {
                key: key.clone(),
                timestamp: parse_rfc3339(&extracted),
                last_accessed: parse_rfc3339(&accessed),
                size_bytes: size.max(0) as u64,
                version: version_from_str(&version),
                original_url: url,
                strategy: StorageStrategy::parse(&strategy).unwrap_or(StorageStrategy::Hybrid),
                in_fast_backend: in_memory != 0,
            }
        }))
    }

    /// Updates `last_accessed` for `key` to now.
    pub async fn touch(&self, key: &PackageKey) -> Result<()> {
        let key_str = key.as_str().to_string();
        let now = Utc::now().to_rfc3339();
        self.with_connection(move |conn| {
            conn.execute(
                "UPDATE packages SET last_accessed = ?1 WHERE key = ?2",
                rusqlite::params![now, key_str],
            )?;
            Ok(())
        })
        .await
    }

    /// All metadata rows ordered by `last_accessed` ascending, so the first
    /// element is the least recently used entry.
    pub async fn list_metadata(&self) -> Result<Vec<CacheEntryMetadata>> {
        let rows = self
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT key, original_url, version, extracted_at, last_accessed,
                           size_bytes, strategy, in_memory
                    FROM packages WHERE has_payload = 1 ORDER BY last_accessed ASC
                    "#,
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, i64>(7)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(key, url, version, extracted, accessed, size, strategy, in_memory)| {
                    CacheEntryMetadata {
                        key: PackageKey::new(key),
                        timestamp: parse_rfc3339(&extracted),
                        last_accessed: parse_rfc3339(&accessed),
                        size_bytes: size.max(0) as u64,
                        version: version_from_str(&version),
                        original_url: url,
                        strategy: StorageStrategy::parse(&strategy)
                            .unwrap_or(StorageStrategy::Hybrid),
                        in_fast_backend: in_memory != 0,
                    }
                },
            )
            .collect())
    }

    /// Number of committed entries.
    pub async fn entry_count(&self) -> Result<usize> {
        let count: i64 = self
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM packages WHERE has_payload = 1",
                    [],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count.max(0) as usize)
    }

    /// Sum of `size_bytes` over all committed entries.
    pub async fn total_size(&self) -> Result<u64> {
        let total: i64 = self
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT COALESCE(SUM(size_bytes), 0) FROM packages WHERE has_payload = 1",
                    [],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(total.max(0) as u64)
    }
}

fn version_to_str(version: ScormVersion) -> &'static str {
    match version {
        ScormVersion::V1_2 => "1.2",
        ScormVersion::V2004 => "2004",
        ScormVersion::Unknown => "unknown",
    }
}

fn version_from_str(value: &str) -> ScormVersion {
    match value {
        "1.2" => ScormVersion::V1_2,
        "2004" => ScormVersion::V2004,
        _ => ScormVersion::Unknown,
    }
}

fn parse_rfc3339(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait::async_trait]
impl PackageStore for SqliteStore {
    async fn put_package(&self, package: &ExtractedPackage) -> Result<()> {
        let key = package.key.as_str().to_string();
        let manifest_json = serde_json::to_string(&package.manifest)?;
        let original_url = package.original_url.clone();
        let version = version_to_str(package.version).to_string();
        let extracted_at = package.extracted_at.to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let size_bytes = package.estimated_size() as i64;
        let files: Vec<(String, String, Vec<u8>)> = package
            .files
            .iter()
            .map(|(path, blob)| (path.clone(), blob.mime.clone(), blob.data.clone()))
            .collect();

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                r#"
                INSERT INTO packages
                    (key, manifest_json, original_url, version, extracted_at,
                     last_accessed, size_bytes, strategy, in_memory, has_payload)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'hybrid', 0, 1)
                ON CONFLICT(key) DO UPDATE SET
                    manifest_json = excluded.manifest_json,
                    original_url = excluded.original_url,
                    version = excluded.version,
                    extracted_at = excluded.extracted_at,
                    last_accessed = excluded.last_accessed,
                    size_bytes = excluded.size_bytes,
                    has_payload = 1
                "#,
                rusqlite::params![
                    key,
                    manifest_json,
                    original_url,
                    version,
                    extracted_at,
                    now,
                    size_bytes
                ],
            )?;
            for (path, mime, data) in files {
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO package_files (key, path, mime, data)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    rusqlite::params![key, path, mime, data],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn put_file(&self, key: &PackageKey, path: &str, blob: FileBlob) -> Result<()> {
        let key_str = key.as_str().to_string();
        let path = path.to_string();
        let now = Utc::now().to_rfc3339();

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            // A placeholder row keeps the foreign key satisfied while files
            // stream in ahead of the manifest.
            tx.execute(
                r#"
                INSERT INTO packages
                    (key, manifest_json, original_url, version, extracted_at,
                     last_accessed, size_bytes, strategy, in_memory, has_payload)
                VALUES (?1, NULL, '', 'unknown', ?2, ?2, 0, 'hybrid', 0, 0)
                ON CONFLICT(key) DO NOTHING
                "#,
                rusqlite::params![key_str, now],
            )?;
            tx.execute(
                r#"
                INSERT OR REPLACE INTO package_files (key, path, mime, data)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                rusqlite::params![key_str, path, blob.mime, blob.data],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_package(&self, key: &PackageKey) -> Result<Option<ExtractedPackage>> {
        let key_str = key.as_str().to_string();
        let row = self
            .with_connection(move |conn| {
                let header = conn
                    .query_row(
                        r#"
                        SELECT manifest_json, original_url, version, extracted_at
                        FROM packages WHERE key = ?1 AND has_payload = 1
                        "#,
                        rusqlite::params![key_str],
                        |row| {
                            Ok((
                                row.get::<_, Option<String>>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some(header) = header else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(
                    "SELECT path, mime, data FROM package_files WHERE key = ?1 ORDER BY path",
                )?;
                let files = stmt
                    .query_map(rusqlite::params![key_str], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(Some((header, files)))
            })
            .await?;

        let Some(((manifest_json, original_url, version, extracted_at), file_rows)) = row else {
            return Ok(None);
        };
        let Some(manifest_json) = manifest_json else {
            return Ok(None);
        };
        let manifest: Manifest = serde_json::from_str(&manifest_json)?;

        let mut files = HashMap::with_capacity(file_rows.len());
        let mut file_list = Vec::with_capacity(file_rows.len());
        for (path, mime, data) in file_rows {
            file_list.push(path.clone());
            files.insert(path, FileBlob { data, mime });
        }

        Ok(Some(ExtractedPackage {
            key: key.clone(),
            manifest,
            files,
            file_list,
            original_url,
            extracted_at: parse_rfc3339(&extracted_at),
            version: version_from_str(&version),
        }))
    }

    async fn get_file(&self, key: &PackageKey, path: &str) -> Result<Option<FileBlob>> {
        let key_str = key.as_str().to_string();
        let path_owned = path.to_string();
        let row = self
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT mime, data FROM package_files WHERE key = ?1 AND path = ?2",
                    rusqlite::params![key_str, path_owned],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
                )
                .optional()
            })
            .await?;

        Ok(row.map(|(mime, data)| {
            if mime.is_empty() {
                FileBlob::new(path, data)
            } else {
                FileBlob { data, mime }
            }
        }))
    }

    async fn file_list(&self, key: &PackageKey) -> Result<Vec<String>> {
        let key_str = key.as_str().to_string();
        self.with_connection(move |conn| {
            let mut stmt =
                conn.prepare("SELECT path FROM package_files WHERE key = ?1 ORDER BY path")?;
            let paths = stmt
                .query_map(rusqlite::params![key_str], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(paths)
        })
        .await
    }

    async fn contains(&self, key: &PackageKey) -> Result<bool> {
        let key_str = key.as_str().to_string();
        let found = self
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT 1 FROM packages WHERE key = ?1 AND has_payload = 1",
                    rusqlite::params![key_str],
                    |_| Ok(()),
                )
                .optional()
            })
            .await?;
        Ok(found.is_some())
    }

    async fn delete(&self, key: &PackageKey) -> Result<bool> {
        let key_str = key.as_str().to_string();
        let deleted = self
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM package_files WHERE key = ?1",
                    rusqlite::params![key_str],
                )?;
                let removed = tx.execute(
                    "DELETE FROM packages WHERE key = ?1",
                    rusqlite::params![key_str],
                )?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn clear(&self) -> Result<()> {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM package_files", [])?;
            tx.execute("DELETE FROM packages", [])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_manifest;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(&dir.path().join("packages.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample_package(key: &str) -> ExtractedPackage {
        let manifest = parse_manifest(
            r#"<manifest xmlns:adlcp="http://www.adlnet.org/xsd/adlcp_rootv1p2">
              <resources><resource identifier="r" type="webcontent" href="index.html"/></resources>
            </manifest>"#,
        )
        .unwrap();
        let mut files = HashMap::new();
        files.insert(
            "index.html".to_string(),
            FileBlob::new("index.html", b"<html/>".to_vec()),
        );
        files.insert(
            "media/clip.mp4".to_string(),
            FileBlob::new("media/clip.mp4", vec![0u8; 32]),
        );
        ExtractedPackage {
            key: PackageKey::new(key),
            version: manifest.version,
            manifest,
            files,
            file_list: vec!["index.html".to_string(), "media/clip.mp4".to_string()],
            original_url: "https://example.com/pkg.zip".to_string(),
            extracted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_package_survives_roundtrip() {
        let (_dir, store) = store().await;
        let package = sample_package("k1");
        store.put_package(&package).await.unwrap();

        let loaded = store.get_package(&package.key).await.unwrap().unwrap();
        assert_eq!(loaded.manifest, package.manifest);
        assert_eq!(loaded.file_list, vec!["index.html", "media/clip.mp4"]);
        assert_eq!(loaded.files["index.html"].data, b"<html/>");
        assert_eq!(loaded.original_url, package.original_url);
        assert_eq!(loaded.version, ScormVersion::V1_2);
    }

    #[tokio::test]
    async fn test_staged_files_without_manifest_not_a_package() {
        let (_dir, store) = store().await;
        let key = PackageKey::new("staged");
        store
            .put_file(&key, "a.html", FileBlob::new("a.html", vec![1, 2, 3]))
            .await
            .unwrap();

        assert!(store.get_package(&key).await.unwrap().is_none());
        assert!(!store.contains(&key).await.unwrap());
        assert!(store.get_file(&key, "a.html").await.unwrap().is_some());
        assert_eq!(store.file_list(&key).await.unwrap(), vec!["a.html"]);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let (_dir, store) = store().await;
        let package = sample_package("k1");
        store.put_package(&package).await.unwrap();

        assert!(store.delete(&package.key).await.unwrap());
        assert!(!store.delete(&package.key).await.unwrap());
        assert!(store.file_list(&package.key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_lru_ordering() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        for (key, offset) in [("old", 300), ("mid", 200), ("new", 100)] {
            let meta = CacheEntryMetadata {
                key: PackageKey::new(key),
                timestamp: now - chrono::Duration::seconds(offset),
                last_accessed: now - chrono::Duration::seconds(offset),
                size_bytes: 10,
                version: ScormVersion::V2004,
                original_url: format!("https://example.com/{key}.zip"),
                strategy: StorageStrategy::Hybrid,
                in_fast_backend: true,
            };
            store.upsert_metadata(&meta).await.unwrap();
        }

        let listed = store.list_metadata().await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["old", "mid", "new"]);
        assert_eq!(store.entry_count().await.unwrap(), 3);
        assert_eq!(store.total_size().await.unwrap(), 30);

        store.touch(&PackageKey::new("old")).await.unwrap();
        let listed = store.list_metadata().await.unwrap();
        assert_eq!(listed.last().unwrap().key.as_str(), "old");
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let (_dir, store) = store().await;
        let meta = CacheEntryMetadata {
            key: PackageKey::new("m1"),
            timestamp: Utc::now(),
            last_accessed: Utc::now(),
            size_bytes: 4096,
            version: ScormVersion::V1_2,
            original_url: "https://example.com/m1.zip".to_string(),
            strategy: StorageStrategy::DurableOnly,
            in_fast_backend: false,
        };
        store.upsert_metadata(&meta).await.unwrap();

        let loaded = store
            .load_metadata(&PackageKey::new("m1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.size_bytes, 4096);
        assert_eq!(loaded.version, ScormVersion::V1_2);
        assert_eq!(loaded.strategy, StorageStrategy::DurableOnly);
        assert!(!loaded.in_fast_backend);

        assert!(
            store
                .load_metadata(&PackageKey::new("missing"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_clear_empties_both_tables() {
        let (_dir, store) = store().await;
        store.put_package(&sample_package("a")).await.unwrap();
        store.put_package(&sample_package("b")).await.unwrap();
        assert_eq!(store.entry_count().await.unwrap(), 2);

        store.clear().await.unwrap();
        assert_eq!(store.entry_count().await.unwrap(), 0);
        assert!(
            store
                .get_package(&PackageKey::new("a"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
