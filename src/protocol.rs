//! Worker message protocol
//!
//! Typed request/response messages exchanged between the
//! [`Coordinator`](crate::coordinator::Coordinator) and the extraction
//! worker. Responses are correlated to requests by [`PackageKey`]; no
//! shared mutable memory crosses the boundary.

use crate::manifest::Manifest;
use crate::package::PackageKey;
use crate::progress::ExtractionStage;
use serde::{Deserialize, Serialize};

/// Requests accepted by the extraction worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Download and extract the archive at `url`, storing it under `key`.
    Extract { url: String, key: PackageKey },
    /// Stop in-flight work for `key` at the next checked point.
    AbortExtraction { key: PackageKey },
    /// Remove the cache entry for `key` from both backends.
    Invalidate { key: PackageKey },
}

impl WorkerRequest {
    pub fn key(&self) -> &PackageKey {
        match self {
            WorkerRequest::Extract { key, .. }
            | WorkerRequest::AbortExtraction { key }
            | WorkerRequest::Invalidate { key } => key,
        }
    }
}

/// Responses emitted by the extraction worker.
///
/// For a single key, zero or more `ExtractionProgress` messages arrive in
/// non-decreasing-progress order, terminated by exactly one of
/// `ExtractionComplete`, `ExtractionError`, or `ExtractionCanceled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    ExtractionProgress {
        key: PackageKey,
        stage: ExtractionStage,
        progress: f64,
        total_size: Option<u64>,
        processed_files: Option<usize>,
        file_count: Option<usize>,
        elapsed_ms: u64,
    },
    ExtractionComplete {
        key: PackageKey,
        manifest: Box<Manifest>,
        file_list: Vec<String>,
        entry_point: String,
        original_url: String,
        timings: ExtractionTimings,
    },
    ExtractionError {
        key: PackageKey,
        error: String,
    },
    ExtractionCanceled {
        key: PackageKey,
    },
    InvalidationComplete {
        key: PackageKey,
    },
    InvalidationError {
        key: PackageKey,
        error: String,
    },
}

impl WorkerResponse {
    pub fn key(&self) -> &PackageKey {
        match self {
            WorkerResponse::ExtractionProgress { key, .. }
            | WorkerResponse::ExtractionComplete { key, .. }
            | WorkerResponse::ExtractionError { key, .. }
            | WorkerResponse::ExtractionCanceled { key }
            | WorkerResponse::InvalidationComplete { key }
            | WorkerResponse::InvalidationError { key, .. } => key,
        }
    }

    /// True for messages that end an extraction attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerResponse::ExtractionComplete { .. }
                | WorkerResponse::ExtractionError { .. }
                | WorkerResponse::ExtractionCanceled { .. }
        )
    }
}

/// Wall-clock timings for the stages of one extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionTimings {
    pub download_ms: u64,
    pub decode_ms: u64,
    pub write_ms: u64,
    pub total_ms: u64,
}
