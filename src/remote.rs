//! External service seams
//!
//! Traits for the two remote dependencies of the engine: the package
//! metadata service that maps a course to its archive URL and optional
//! launch override, and the tracking backend that stores committed
//! runtime data and serves it back on the next launch. HTTP
//! implementations are provided; tests swap in the in-memory backend.

use crate::error::{Result, TrackingError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a course's package lives and, optionally, which file to launch.
///
/// `entry_point` overrides the manifest-derived entry point when set.
/// `manifest_path` and `version` are informational hints some metadata
/// services include; the manifest inside the archive remains authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMeta {
    pub url: String,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub manifest_path: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Resolves a course id to its package metadata.
#[async_trait::async_trait]
pub trait PackageSource: Send + Sync {
    async fn resolve(&self, course_id: &str) -> Result<PackageMeta>;
}

/// Package source backed by an HTTP metadata endpoint.
pub struct HttpPackageSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPackageSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl PackageSource for HttpPackageSource {
    async fn resolve(&self, course_id: &str) -> Result<PackageMeta> {
        let url = format!(
            "{}/courses/{}/package",
            self.base_url.trim_end_matches('/'),
            course_id
        );
        let meta = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<PackageMeta>()
            .await?;
        Ok(meta)
    }
}

/// One committed snapshot of a session's runtime data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    pub session_id: String,
    pub course_id: String,
    pub data: HashMap<String, String>,
    pub committed_at: DateTime<Utc>,
}

/// Previously stored runtime state for one learner and package, returned
/// when a session rebinds.
///
/// `data_blob` holds the raw data model elements; `completion_status`,
/// `location`, and `score` are the fields hosts surface without parsing the
/// blob. A learner with no stored record reads as "not attempted".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub user_id: String,
    pub package_id: String,
    #[serde(default)]
    pub data_blob: HashMap<String, String>,
    #[serde(default = "default_completion_status")]
    pub completion_status: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

fn default_completion_status() -> String {
    "not attempted".to_string()
}

/// Stores committed runtime tracking data and serves it back by learner
/// and package.
#[async_trait::async_trait]
pub trait TrackingBackend: Send + Sync {
    async fn persist(&self, payload: &CommitPayload) -> Result<()>;
    /// Fetches the stored record for `user_id` on `package_id`, or `None`
    /// when the learner has never committed anything for the package.
    async fn load(&self, user_id: &str, package_id: &str) -> Result<Option<TrackingRecord>>;
}

/// Tracking backend that POSTs commit payloads as JSON.
pub struct HttpTrackingBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTrackingBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl TrackingBackend for HttpTrackingBackend {
    async fn persist(&self, payload: &CommitPayload) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| TrackingError::PersistFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn load(&self, user_id: &str, package_id: &str) -> Result<Option<TrackingRecord>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("user_id", user_id), ("package_id", package_id)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = response
            .error_for_status()?
            .json::<TrackingRecord>()
            .await?;
        Ok(Some(record))
    }
}

/// Tracking backend that records commits in memory.
#[derive(Default)]
pub struct InMemoryTrackingBackend {
    commits: std::sync::Mutex<Vec<CommitPayload>>,
    records: std::sync::Mutex<HashMap<(String, String), TrackingRecord>>,
}

impl InMemoryTrackingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<CommitPayload> {
        self.commits.lock().unwrap().clone()
    }

    /// Seeds a stored record, as if a previous launch had committed it.
    pub fn put_record(&self, record: TrackingRecord) {
        self.records.lock().unwrap().insert(
            (record.user_id.clone(), record.package_id.clone()),
            record,
        );
    }
}

#[async_trait::async_trait]
impl TrackingBackend for InMemoryTrackingBackend {
    async fn persist(&self, payload: &CommitPayload) -> Result<()> {
        self.commits.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn load(&self, user_id: &str, package_id: &str) -> Result<Option<TrackingRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), package_id.to_string()))
            .cloned())
    }
}
