//! Core package types
//!
//! The [`PackageKey`] identifies one cache entry and at most one in-flight
//! extraction; an [`ExtractedPackage`] is the immutable result of a
//! successful extraction.

use crate::manifest::{Manifest, ScormVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Opaque key identifying a package in the cache.
///
/// Derived deterministically from a course id and the archive URL, so
/// repeated requests for the same course map to the same cache entry and
/// the same in-flight extraction.
///
/// # Example
///
/// ```rust
/// use scorm_engine::package::PackageKey;
///
/// let a = PackageKey::derive("course-42", "https://cdn.example.com/pkg.zip");
/// let b = PackageKey::derive("course-42", "https://cdn.example.com/pkg.zip");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageKey(String);

impl PackageKey {
    /// Wraps an already-derived key string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Derives a key from a course id and archive URL.
    pub fn derive(course_id: &str, url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(course_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single extracted file: its bytes plus a MIME type derived from the
/// file extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBlob {
    pub data: Vec<u8>,
    pub mime: String,
}

impl FileBlob {
    pub fn new(path: &str, data: Vec<u8>) -> Self {
        Self {
            mime: mime_for_path(path).to_string(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The immutable result of a successful extraction.
///
/// `files` is empty when the package is served directly from the fast
/// backend by path rather than reconstructed in memory; `file_list` always
/// enumerates the extracted paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPackage {
    pub key: PackageKey,
    pub manifest: Manifest,
    pub files: HashMap<String, FileBlob>,
    pub file_list: Vec<String>,
    pub original_url: String,
    pub extracted_at: DateTime<Utc>,
    pub version: ScormVersion,
}

impl ExtractedPackage {
    /// Approximate in-memory size: manifest JSON plus all blob bytes.
    pub fn estimated_size(&self) -> u64 {
        let manifest_size = serde_json::to_vec(&self.manifest)
            .map(|v| v.len() as u64)
            .unwrap_or(0);
        let blob_size: u64 = self.files.values().map(|blob| blob.len() as u64).sum();
        manifest_size + blob_size
    }
}

/// MIME type for a file path, by extension. Unknown extensions map to
/// `application/octet-stream`.
pub fn mime_for_path(path: &str) -> &'static str {
    let extension = path
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "html" | "htm" | "xhtml" => "text/html",
        "js" | "mjs" => "text/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "xml" | "xsd" => "application/xml",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "pdf" => "application/pdf",
        "swf" => "application/x-shockwave-flash",
        _ => "application/octet-stream",
    }
}
